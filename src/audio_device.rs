use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, HostId};

fn get_host_from_id(host_id: HostId) -> Result<Host> {
    cpal::host_from_id(host_id).map_err(|e| anyhow::anyhow!("Failed to get audio host: {}", e))
}

/// Resolves a host by name, case-insensitively. `None` picks the default host.
pub fn find_host(name: Option<&str>) -> Result<HostId> {
    let Some(name) = name else {
        return Ok(cpal::default_host().id());
    };
    cpal::available_hosts()
        .into_iter()
        .find(|id| id.name().eq_ignore_ascii_case(name))
        .ok_or_else(|| anyhow::anyhow!("Audio host not available: {}", name))
}

pub fn get_input_devices(host_id: HostId) -> Result<Vec<(String, Device)>> {
    let host = get_host_from_id(host_id)?;
    let devices = host.input_devices()?;
    let mut result = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            result.push((name, device));
        }
    }
    Ok(result)
}

pub fn get_output_devices(host_id: HostId) -> Result<Vec<(String, Device)>> {
    let host = get_host_from_id(host_id)?;
    let devices = host.output_devices()?;
    let mut result = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            result.push((name, device));
        }
    }
    Ok(result)
}

/// Human-readable listing of every host with its devices.
pub fn describe_devices() -> Result<String> {
    let mut out = String::new();
    for host_id in cpal::available_hosts() {
        out.push_str(&format!("{}\n", host_id.name()));
        match get_input_devices(host_id) {
            Ok(devices) => {
                for (name, _) in devices {
                    out.push_str(&format!("  in:  {}\n", name));
                }
            }
            Err(e) => log::warn!("Could not list inputs for {}: {}", host_id.name(), e),
        }
        match get_output_devices(host_id) {
            Ok(devices) => {
                for (name, _) in devices {
                    out.push_str(&format!("  out: {}\n", name));
                }
            }
            Err(e) => log::warn!("Could not list outputs for {}: {}", host_id.name(), e),
        }
    }
    Ok(out)
}
