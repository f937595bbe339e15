//! Shared test helpers for service tests.
//!
//! Recording fakes of every port. Mutating calls on the cloud and settings
//! fakes land in one shared [`Journal`] so tests can assert cross-port order.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use cpi_common::AgentEnv;

use crate::application::ports::{CloudApi, CommandOutput, RemoteRunner, SettingsStore};
use crate::application::services::Ports;
use crate::domain::CpiConfig;
use crate::domain::error::CpiError;
use crate::domain::network::{Nic, NicInventory, Subnet};
use crate::domain::storage::{DiskHandle, DiskOrder, HostCredential};
use crate::domain::vm::{
    HostActivity, InstanceTemplate, RemoteHost, Stemcell, Vlan, VlanSpace, VmHandle, VmKind,
};

pub const PRIVATE_VLAN: u32 = 1_292_651;
pub const PUBLIC_VLAN: u32 = 1_292_653;

pub type Journal = Arc<Mutex<Vec<String>>>;

// ── Fixtures ──────────────────────────────────────────────────────────────────

pub fn vm_handle(id: u64) -> VmHandle {
    VmHandle {
        id,
        kind: VmKind::VirtualGuest,
        hostname: format!("bosh-{id}"),
        fqdn: format!("bosh-{id}.example.com"),
        datacenter: "dal10".into(),
        primary_ip: "169.50.68.77".into(),
        backend_ip: "10.112.39.113".into(),
        root_password: "root-pw".into(),
    }
}

pub fn bare_metal(id: u64) -> VmHandle {
    VmHandle {
        kind: VmKind::BareMetal,
        ..vm_handle(id)
    }
}

pub fn host() -> RemoteHost {
    vm_handle(111).remote_host("root")
}

pub fn disk_handle(id: u64) -> DiskHandle {
    DiskHandle {
        id,
        size_gb: 20,
        datacenter: "dal10".into(),
        target_address: "10.2.3.4".into(),
        billing_item_id: Some(id + 10_000),
    }
}

pub fn credential() -> HostCredential {
    HostCredential {
        initiator_name: "iqn.2005-05.com.softlayer:SL01SU276540-H111".into(),
        username: "SL01SU276540-H111".into(),
        password: "chap-secret".into(),
    }
}

pub fn nics() -> NicInventory {
    NicInventory {
        private: Nic {
            vlan_id: PRIVATE_VLAN,
            port: 0,
            primary_ip: Ipv4Addr::new(10, 112, 39, 113),
            mac: "06:7f:8a:11:22:01".into(),
            subnets: vec![Subnet {
                cidr: "10.112.39.64/26".parse().unwrap(),
                gateway: Ipv4Addr::new(10, 112, 39, 65),
            }],
        },
        public: Some(Nic {
            vlan_id: PUBLIC_VLAN,
            port: 1,
            primary_ip: Ipv4Addr::new(169, 50, 68, 77),
            mac: "06:7f:8a:11:22:02".into(),
            subnets: vec![Subnet {
                cidr: "169.50.68.64/28".parse().unwrap(),
                gateway: Ipv4Addr::new(169, 50, 68, 65),
            }],
        }),
    }
}

/// A valid configuration with short waits.
pub fn config() -> CpiConfig {
    let mut cfg = CpiConfig::default();
    cfg.cloud.username = "user".into();
    cfg.cloud.api_key = "key".into();
    cfg.agent.mbus = "https://mbus:pw@0.0.0.0:6868".into();
    cfg.agent.ntp = vec!["0.pool.ntp.org".into()];
    cfg.agent.blobstore.provider = "dav".into();
    cfg.disk.attach_timeout_secs = 30;
    cfg.disk.poll_interval_secs = 5;
    cfg.settings.retry_count = 3;
    cfg.settings.retry_delay_secs = 2;
    cfg.vm.ready_timeout_secs = 60;
    cfg.vm.ready_interval_secs = 10;
    cfg
}

// ── Cloud API fake ────────────────────────────────────────────────────────────

/// Scripted provisioning transactions, shared by every fake host.
#[derive(Default)]
pub struct Transactions {
    /// Activity reads after a reload or upgrade before its transaction shows.
    pub start_delay: u32,
    /// Activity reads reporting a started transaction before it completes.
    pub busy_reads: u32,
    queued: Option<u32>,
    running: Option<(u64, u32)>,
    last: Option<u64>,
}

impl Transactions {
    fn start(&mut self, busy_reads: u32) {
        let id = self.last.map_or(1, |id| id + 1);
        self.running = Some((id, busy_reads));
    }
}

#[derive(Default)]
pub struct FakeCloud {
    pub journal: Journal,
    pub stemcells: Mutex<BTreeMap<u64, Stemcell>>,
    pub vlans: Mutex<BTreeMap<u32, Vlan>>,
    pub vms: Mutex<BTreeMap<u64, VmHandle>>,
    pub disks: Mutex<BTreeMap<u64, DiskHandle>>,
    pub allowed: Mutex<BTreeMap<(u64, u64), HostCredential>>,
    pub templates: Mutex<Vec<InstanceTemplate>>,
    pub tags: Mutex<Vec<Vec<String>>>,
    pub transactions: Mutex<Transactions>,
    /// When set, authorizations are recorded but never become visible.
    pub authorization_invisible: Mutex<bool>,
}

impl FakeCloud {
    pub fn standard() -> Self {
        let cloud = Self::default();
        cloud.stemcells.lock().unwrap().insert(
            7,
            Stemcell {
                id: 7,
                global_identifier: "stemcell-uuid".into(),
            },
        );
        let mut vlans = cloud.vlans.lock().unwrap();
        vlans.insert(
            PRIVATE_VLAN,
            Vlan {
                id: PRIVATE_VLAN,
                space: VlanSpace::Private,
            },
        );
        vlans.insert(
            PUBLIC_VLAN,
            Vlan {
                id: PUBLIC_VLAN,
                space: VlanSpace::Public,
            },
        );
        drop(vlans);
        cloud
    }

    pub fn add_vm(&self, vm: VmHandle) {
        self.vms.lock().unwrap().insert(vm.id, vm);
    }

    pub fn add_disk(&self, disk: DiskHandle) {
        self.disks.lock().unwrap().insert(disk.id, disk);
    }

    pub fn allow(&self, vm: u64, disk: u64) {
        self.allowed
            .lock()
            .unwrap()
            .insert((vm, disk), credential());
    }

    pub fn script_transactions(&self, start_delay: u32, busy_reads: u32) {
        let mut tx = self.transactions.lock().unwrap();
        tx.start_delay = start_delay;
        tx.busy_reads = busy_reads;
    }

    /// Puts a transaction in flight now, busy for `busy_reads` reads.
    pub fn start_transaction(&self, busy_reads: u32) {
        self.transactions.lock().unwrap().start(busy_reads);
    }

    fn queue_transaction(&self) {
        let mut tx = self.transactions.lock().unwrap();
        tx.queued = Some(tx.start_delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    /// Number of journal entries starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }
}

impl CloudApi for FakeCloud {
    async fn get_stemcell(&self, id: u64) -> Result<Option<Stemcell>> {
        Ok(self.stemcells.lock().unwrap().get(&id).cloned())
    }

    async fn get_vlan(&self, id: u32) -> Result<Option<Vlan>> {
        Ok(self.vlans.lock().unwrap().get(&id).copied())
    }

    async fn create_instance(&self, template: &InstanceTemplate) -> Result<VmHandle> {
        self.record("cloud.create_instance".into());
        self.templates.lock().unwrap().push(template.clone());
        let vm = VmHandle {
            hostname: template.hostname.clone(),
            fqdn: format!("{}.{}", template.hostname, template.domain),
            ..vm_handle(111)
        };
        self.add_vm(vm.clone());
        Ok(vm)
    }

    async fn find_vm(&self, id: u64) -> Result<Option<VmHandle>> {
        Ok(self.vms.lock().unwrap().get(&id).cloned())
    }

    async fn find_vm_by_ip(&self, ip: &str) -> Result<Option<VmHandle>> {
        Ok(self
            .vms
            .lock()
            .unwrap()
            .values()
            .find(|vm| vm.primary_ip == ip || vm.backend_ip == ip)
            .cloned())
    }

    async fn host_activity(&self, vm: &VmHandle) -> Result<HostActivity> {
        let mut guard = self.transactions.lock().unwrap();
        let tx = &mut *guard;
        match tx.queued {
            Some(0) => {
                tx.queued = None;
                tx.start(tx.busy_reads);
            }
            Some(wait) => tx.queued = Some(wait - 1),
            None => {}
        }
        let active = match tx.running {
            Some((id, 0)) => {
                tx.running = None;
                tx.last = Some(id);
                self.record(format!("cloud.transaction_complete {} {id}", vm.id));
                None
            }
            Some((id, left)) => {
                tx.running = Some((id, left - 1));
                Some(id)
            }
            None => None,
        };
        Ok(HostActivity {
            active_transaction: active,
            last_transaction: tx.last,
            running: true,
        })
    }

    async fn reload_os(&self, vm: &VmHandle, stemcell: &Stemcell) -> Result<()> {
        self.record(format!("cloud.reload_os {} {}", vm.id, stemcell.id));
        self.queue_transaction();
        Ok(())
    }

    async fn attach_ephemeral_disk(&self, vm: &VmHandle, size_gb: u32) -> Result<()> {
        self.record(format!("cloud.attach_ephemeral_disk {} {size_gb}", vm.id));
        self.queue_transaction();
        Ok(())
    }

    async fn nic_inventory(&self, _vm: &VmHandle) -> Result<NicInventory> {
        Ok(nics())
    }

    async fn set_tags(&self, vm: &VmHandle, tags: &[String]) -> Result<()> {
        self.record(format!("cloud.set_tags {}", vm.id));
        self.tags.lock().unwrap().push(tags.to_vec());
        Ok(())
    }

    async fn reboot(&self, vm: &VmHandle) -> Result<()> {
        self.record(format!("cloud.reboot {}", vm.id));
        Ok(())
    }

    async fn cancel_instance(&self, vm: &VmHandle) -> Result<()> {
        self.record(format!("cloud.cancel_instance {}", vm.id));
        self.vms.lock().unwrap().remove(&vm.id);
        Ok(())
    }

    async fn find_disk(&self, id: u64) -> Result<Option<DiskHandle>> {
        Ok(self.disks.lock().unwrap().get(&id).cloned())
    }

    async fn order_disk(&self, order: &DiskOrder) -> Result<DiskHandle> {
        self.record(format!(
            "cloud.order_disk {}GB {}",
            order.size_gb, order.datacenter
        ));
        let id = 900 + self.disks.lock().unwrap().len() as u64;
        let disk = DiskHandle {
            size_gb: order.size_gb,
            datacenter: order.datacenter.clone(),
            ..disk_handle(id)
        };
        self.add_disk(disk.clone());
        Ok(disk)
    }

    async fn cancel_disk(&self, disk: &DiskHandle) -> Result<()> {
        self.record(format!("cloud.cancel_disk {}", disk.id));
        self.disks.lock().unwrap().remove(&disk.id);
        Ok(())
    }

    async fn allowed_host_credential(
        &self,
        vm: &VmHandle,
        disk: &DiskHandle,
    ) -> Result<Option<HostCredential>> {
        Ok(self.allowed.lock().unwrap().get(&(vm.id, disk.id)).cloned())
    }

    async fn authorize_host(&self, vm: &VmHandle, disk: &DiskHandle) -> Result<()> {
        self.record(format!("cloud.authorize_host {} {}", vm.id, disk.id));
        if !*self.authorization_invisible.lock().unwrap() {
            self.allow(vm.id, disk.id);
        }
        Ok(())
    }

    async fn deauthorize_host(&self, vm: &VmHandle, disk: &DiskHandle) -> Result<()> {
        self.record(format!("cloud.deauthorize_host {} {}", vm.id, disk.id));
        self.allowed.lock().unwrap().remove(&(vm.id, disk.id));
        Ok(())
    }
}

// ── Remote runner fake ────────────────────────────────────────────────────────

/// Scripted remote host. `exec` answers with the first rule whose pattern
/// occurs in the script; a rule's last queued output repeats forever.
/// Unmatched scripts succeed with empty output.
#[derive(Default)]
pub struct FakeRemote {
    pub execs: Mutex<Vec<String>>,
    rules: Mutex<Vec<(String, VecDeque<CommandOutput>)>>,
    pub files: Mutex<BTreeMap<String, Vec<u8>>>,
    pub upload_attempts: Mutex<Vec<String>>,
    /// Uploads failing with a transient error before one succeeds.
    pub failing_uploads: Mutex<u32>,
}

impl FakeRemote {
    /// A host without the multipath tools.
    pub fn without_multipath() -> Self {
        let remote = Self::default();
        remote.respond("command -v multipath", Self::exit(1));
        remote
    }

    pub fn respond(&self, pattern: &str, output: CommandOutput) {
        let mut rules = self.rules.lock().unwrap();
        match rules.iter_mut().find(|(p, _)| p == pattern) {
            Some((_, queue)) => queue.push_back(output),
            None => rules.push((pattern.to_string(), VecDeque::from([output]))),
        }
    }

    pub fn stdout(text: &str) -> CommandOutput {
        CommandOutput {
            status: 0,
            stdout: text.to_string(),
            stderr: String::new(),
        }
    }

    pub fn exit(status: i32) -> CommandOutput {
        CommandOutput {
            status,
            ..CommandOutput::default()
        }
    }

    pub fn execs(&self) -> Vec<String> {
        self.execs.lock().unwrap().clone()
    }

    /// Number of executed scripts containing `needle`.
    pub fn executed(&self, needle: &str) -> usize {
        self.execs().iter().filter(|s| s.contains(needle)).count()
    }
}

impl RemoteRunner for FakeRemote {
    async fn exec(&self, _host: &RemoteHost, script: &str) -> Result<CommandOutput> {
        self.execs.lock().unwrap().push(script.to_string());
        let mut rules = self.rules.lock().unwrap();
        let Some((_, queue)) = rules.iter_mut().find(|(p, _)| script.contains(p.as_str())) else {
            return Ok(CommandOutput::default());
        };
        let output = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(output.unwrap_or_default())
    }

    async fn upload(&self, _host: &RemoteHost, path: &str, contents: &[u8]) -> Result<()> {
        self.upload_attempts.lock().unwrap().push(path.to_string());
        let mut failing = self.failing_uploads.lock().unwrap();
        if *failing > 0 {
            *failing -= 1;
            return Err(CpiError::TransientRemote("connection refused".into()).into());
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.to_vec());
        Ok(())
    }

    async fn download(&self, _host: &RemoteHost, path: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| CpiError::NotFound(format!("file '{path}'")).into())
    }
}

// ── Settings store fake ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeSettings {
    pub journal: Journal,
    pub envs: Mutex<BTreeMap<u64, AgentEnv>>,
    pub updates: Mutex<Vec<(u64, AgentEnv)>>,
    pub delete_error: Mutex<Option<CpiError>>,
}

impl FakeSettings {
    pub fn seed(&self, vm: u64, env: AgentEnv) {
        self.envs.lock().unwrap().insert(vm, env);
    }

    pub fn updates(&self) -> Vec<(u64, AgentEnv)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn current(&self, vm: u64) -> Option<AgentEnv> {
        self.envs.lock().unwrap().get(&vm).cloned()
    }
}

impl SettingsStore for FakeSettings {
    async fn fetch(&self, vm: &VmHandle) -> Result<AgentEnv> {
        self.envs
            .lock()
            .unwrap()
            .get(&vm.id)
            .cloned()
            .ok_or_else(|| CpiError::NotFound(format!("settings for VM '{}'", vm.id)).into())
    }

    async fn update(&self, vm: &VmHandle, env: &AgentEnv) -> Result<()> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("settings.update {}", vm.id));
        self.updates.lock().unwrap().push((vm.id, env.clone()));
        self.envs.lock().unwrap().insert(vm.id, env.clone());
        Ok(())
    }

    async fn delete(&self, vm: &VmHandle) -> Result<()> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("settings.delete {}", vm.id));
        if let Some(err) = self.delete_error.lock().unwrap().clone() {
            return Err(err.into());
        }
        self.envs.lock().unwrap().remove(&vm.id);
        Ok(())
    }
}

// ── Bundle ────────────────────────────────────────────────────────────────────

/// One fake of every port plus a test configuration, sharing one journal.
pub struct Fakes {
    pub cloud: FakeCloud,
    pub remote: FakeRemote,
    pub settings: FakeSettings,
    pub config: CpiConfig,
}

impl Fakes {
    pub fn new(remote: FakeRemote) -> Self {
        let cloud = FakeCloud::standard();
        let settings = FakeSettings {
            journal: Arc::clone(&cloud.journal),
            ..FakeSettings::default()
        };
        Self {
            cloud,
            remote,
            settings,
            config: config(),
        }
    }

    pub fn ports(&self) -> Ports<'_, FakeCloud, FakeRemote, FakeSettings> {
        Ports::new(&self.cloud, &self.remote, &self.settings, &self.config)
    }
}
