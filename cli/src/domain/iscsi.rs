//! Shell scripts run on a guest to bind and release iSCSI volumes.
//!
//! Every caller-provided value is single-quoted with [`shell_quote`].

use crate::domain::storage::HostCredential;

/// Mount point of the persistent disk inside the guest.
pub const STORE_MOUNT: &str = "/var/vcap/store";

const ISCSI_SERVICE: &str = "/etc/init.d/open-iscsi";
const INITIATOR_FILE: &str = "/etc/iscsi/initiatorname.iscsi";
const ISCSID_CONF: &str = "/etc/iscsi/iscsid.conf";

/// Quotes `value` for a POSIX shell.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Writes the initiator name and CHAP credentials, then restarts the
/// iSCSI service so they take effect.
#[must_use]
pub fn configure_initiator_script(credential: &HostCredential) -> String {
    let initiator = shell_quote(&format!("InitiatorName={}", credential.initiator_name));
    let chap_lines = [
        "node.session.auth.authmethod = CHAP".to_string(),
        format!("node.session.auth.username = {}", credential.username),
        format!("node.session.auth.password = {}", credential.password),
        "discovery.sendtargets.auth.authmethod = CHAP".to_string(),
        format!("discovery.sendtargets.auth.username = {}", credential.username),
        format!("discovery.sendtargets.auth.password = {}", credential.password),
    ]
    .iter()
    .map(|l| shell_quote(l))
    .collect::<Vec<_>>()
    .join(" ");

    [
        format!("printf '%s\\n' {initiator} > {INITIATOR_FILE}"),
        format!(
            "sed -i -E '/^(node\\.session|discovery\\.sendtargets)\\.auth\\.\
             (authmethod|username|password)[[:space:]]*=/d' {ISCSID_CONF}"
        ),
        format!("printf '%s\\n' {chap_lines} >> {ISCSID_CONF}"),
        format!("{ISCSI_SERVICE} restart"),
    ]
    .join(" && ")
}

/// Discovers the targets behind `portal` and logs in to them.
#[must_use]
pub fn discovery_login_script(portal: &str) -> String {
    let portal = shell_quote(portal);
    format!(
        "iscsiadm -m discovery -t sendtargets -p {portal} && iscsiadm -m node -p {portal} --login"
    )
}

/// Lists live sessions with their attached disks. Prints nothing when the
/// host has no session.
#[must_use]
pub fn list_sessions_script() -> String {
    "iscsiadm -m session -P 3 2>/dev/null || true".to_string()
}

/// Prints the multipath map holding `device`.
#[must_use]
pub fn multipath_map_script(device: &str) -> String {
    format!("multipath -l -v1 {}", shell_quote(&format!("/dev/{device}")))
}

/// Unmounts the persistent store if it is mounted.
#[must_use]
pub fn unmount_store_script() -> String {
    format!("if mountpoint -q {STORE_MOUNT}; then umount {STORE_MOUNT}; fi")
}

/// Stops the iSCSI service, purges discovery and node records, and starts it
/// again. Every session on the host is dropped.
#[must_use]
pub fn reset_iscsi_script() -> String {
    [
        format!("{ISCSI_SERVICE} stop"),
        "rm -rf /etc/iscsi/send_targets/* /etc/iscsi/nodes/*".to_string(),
        format!("{ISCSI_SERVICE} start"),
    ]
    .join(" && ")
}

/// Exits 0 once `device` exists as a block device.
#[must_use]
pub fn block_device_check(device: &str) -> String {
    format!("test -b {}", shell_quote(device))
}

/// Mounts `partition` at the persistent store.
#[must_use]
pub fn mount_store_script(partition: &str) -> String {
    format!(
        "mkdir -p {STORE_MOUNT} && mount {} {STORE_MOUNT}",
        shell_quote(partition)
    )
}

/// Sets the privileged account's password; crypt hashes (leading `$`) are
/// installed as-is.
#[must_use]
pub fn set_password_script(user: &str, password: &str) -> String {
    let entry = shell_quote(&format!("{user}:{password}"));
    if password.starts_with('$') {
        format!("echo {entry} | chpasswd -e")
    } else {
        format!("echo {entry} | chpasswd")
    }
}
