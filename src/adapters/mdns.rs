//! mDNS service advertisement adapter.
//!
//! Implements [`DiscoveryPort`]: sets the hostname and instance name and
//! advertises `_dap._tcp` on the transport port with a `version` TXT
//! record. Runs on the short-lived discovery task; once registered the
//! responder lives inside the IDF mdns component.

use log::{info, warn};

use crate::supervisor::ports::DiscoveryPort;

const MDNS_SERVICE_TYPE: &str = "_dap";
const MDNS_SERVICE_PROTO: &str = "_tcp";

/// mDNS advertisement adapter.
#[derive(Debug, Default)]
pub struct MdnsAdapter {
    active: bool,
}

/// Copy `s` into a NUL-terminated buffer, truncating if needed.
#[cfg(target_os = "espidf")]
fn c_buf<const N: usize>(s: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    let len = s.len().min(N - 1);
    buf[..len].copy_from_slice(&s.as_bytes()[..len]);
    buf
}

impl MdnsAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a record has been registered.
    pub fn is_active(&self) -> bool {
        self.active
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_start(hostname: &str, instance_name: &str, port: u16) -> Result<(), i32> {
        use esp_idf_svc::sys::*;

        let host = c_buf::<33>(hostname);
        let instance = c_buf::<33>(instance_name);
        let svc_type = b"_dap\0";
        let svc_proto = b"_tcp\0";
        let ver = concat!(env!("CARGO_PKG_VERSION"), "\0");

        // SAFETY: every pointer passed below is NUL-terminated and outlives
        // the call; the component copies what it keeps.
        unsafe {
            let ret = mdns_init();
            if ret != ESP_OK {
                return Err(ret);
            }
            let ret = mdns_hostname_set(host.as_ptr().cast());
            if ret != ESP_OK {
                mdns_free();
                return Err(ret);
            }
            mdns_instance_name_set(instance.as_ptr().cast());

            let ret = mdns_service_add(
                instance.as_ptr().cast(),
                svc_type.as_ptr().cast(),
                svc_proto.as_ptr().cast(),
                port,
                core::ptr::null_mut(),
                0,
            );
            if ret != ESP_OK {
                mdns_free();
                return Err(ret);
            }
            mdns_service_txt_item_set(
                svc_type.as_ptr().cast(),
                svc_proto.as_ptr().cast(),
                b"version\0".as_ptr().cast(),
                ver.as_ptr().cast(),
            );
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(hostname: &str, instance_name: &str, port: u16) -> Result<(), i32> {
        info!(
            "mDNS(sim): registered {}.local '{}' port {} v={}",
            hostname,
            instance_name,
            port,
            env!("CARGO_PKG_VERSION")
        );
        Ok(())
    }
}

impl DiscoveryPort for MdnsAdapter {
    fn publish(&mut self, device_name: &str, instance_name: &str, service_port: u16) {
        if self.active {
            return;
        }
        match Self::platform_start(device_name, instance_name, service_port) {
            Ok(()) => {
                self.active = true;
                info!(
                    "mDNS: advertising {}.local → {}.{}:{}",
                    device_name, MDNS_SERVICE_TYPE, MDNS_SERVICE_PROTO, service_port
                );
            }
            Err(code) => warn!("mDNS: registration failed ({}), continuing without", code),
        }
    }
}
