//! Builds the bootstrap settings a new VM's agent reads on first boot.

use cpi_common::{AgentEnv, Blobstore, Disks, Networks, VmRef};
use serde_json::{Map, Value};

use crate::domain::config::AgentConfig;
use crate::domain::vm::{SYSTEM_DISK_PATH, VmHandle};

/// Listen-anywhere host that gets replaced by the VM's reachable address.
pub const PLACEHOLDER_HOST: &str = "0.0.0.0";

/// Assembles the [`AgentEnv`] for `vm`.
///
/// The mbus URL and blobstore `endpoint` are rewritten when their host is
/// [`PLACEHOLDER_HOST`]; NTP servers and `env` are copied verbatim.
#[must_use]
pub fn build_agent_env(
    agent_id: &str,
    vm: &VmHandle,
    agent: &AgentConfig,
    networks: Networks,
    ephemeral_path: &str,
    env: Map<String, Value>,
) -> AgentEnv {
    let address = vm.reachable_address();

    let mut options = agent.blobstore.options.clone();
    if let Some(Value::String(endpoint)) = options.get_mut("endpoint") {
        *endpoint = rewrite_placeholder_host(endpoint, address);
    }

    AgentEnv {
        agent_id: agent_id.to_string(),
        vm: VmRef {
            name: vm.hostname.clone(),
            id: vm.id.to_string(),
        },
        mbus: rewrite_placeholder_host(&agent.mbus, address),
        ntp: agent.ntp.clone(),
        blobstore: Blobstore {
            provider: agent.blobstore.provider.clone(),
            options,
        },
        networks,
        disks: Disks {
            system: SYSTEM_DISK_PATH.to_string(),
            ephemeral: ephemeral_path.to_string(),
            persistent: std::collections::BTreeMap::new(),
        },
        env,
    }
}

/// Replaces a `0.0.0.0` host in `raw` with `address`.
///
/// Only the authority is touched, so the rest of the URL (including the
/// absence of a trailing slash) is preserved. Anything that is not a URL
/// with the placeholder host is returned unchanged.
#[must_use]
pub fn rewrite_placeholder_host(raw: &str, address: &str) -> String {
    let is_placeholder = url::Url::parse(raw)
        .ok()
        .is_some_and(|u| u.host_str() == Some(PLACEHOLDER_HOST));
    if !is_placeholder {
        return raw.to_string();
    }
    let Some(scheme_end) = raw.find("://").map(|i| i + 3) else {
        return raw.to_string();
    };
    let rest = &raw[scheme_end..];
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let host_start = rest[..authority_end].rfind('@').map_or(0, |i| i + 1);

    let start = scheme_end + host_start;
    if raw[start..].starts_with(PLACEHOLDER_HOST) {
        format!(
            "{}{address}{}",
            &raw[..start],
            &raw[start + PLACEHOLDER_HOST.len()..]
        )
    } else {
        raw.to_string()
    }
}
