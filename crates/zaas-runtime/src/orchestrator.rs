//! The bootstrap state machine.
//!
//! A run moves the appliance from whatever is on disk towards `Registered`,
//! skipping every step whose result is already persisted. Each persisted
//! step is an atomic replace, so a run aborted anywhere can simply be repeated.

use tracing::{info, warn};
use zaas_core::identity::InstanceIdentity;
use zaas_core::manager::ManagerConfig;
use zaas_core::telemetry::VmStatus;

use crate::error::BootstrapError;
use crate::pairing::PairingChannel;
use crate::privilege::Privilege;
use crate::sso::SsoClient;
use crate::store::IdentityStore;
use crate::telemetry::TelemetrySource;
use crate::vm_probe::VmProbe;

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Client secret already present and registration acknowledged; no network calls made.
    AlreadyConfigured,
    /// Fleet manager acknowledged the registration during this run.
    Registered,
    /// Paired, but the document carried no token to exchange yet.
    AwaitingToken,
}

pub struct Bootstrap<'a> {
    store: &'a IdentityStore,
    privilege: &'a dyn Privilege,
    vm_probe: &'a dyn VmProbe,
    pairing: &'a mut dyn PairingChannel,
    sso: &'a dyn SsoClient,
    telemetry: &'a dyn TelemetrySource,
    vm: Option<VmStatus>,
}

impl<'a> Bootstrap<'a> {
    pub fn new(
        store: &'a IdentityStore,
        privilege: &'a dyn Privilege,
        vm_probe: &'a dyn VmProbe,
        pairing: &'a mut dyn PairingChannel,
        sso: &'a dyn SsoClient,
        telemetry: &'a dyn TelemetrySource,
    ) -> Self {
        Self {
            store,
            privilege,
            vm_probe,
            pairing,
            sso,
            telemetry,
            vm: None,
        }
    }

    /// Run the full state machine.
    pub fn run(&mut self) -> Result<Outcome, BootstrapError> {
        self.require_privilege()?;

        let (identity, created) = self.store.load_or_create_identity()?;
        if created {
            info!(%identity, "generated new instance identity");
        } else {
            info!(%identity, "loaded instance identity");
        }

        let existing = self.store.load_config()?;
        match &existing {
            None => info!(path = %self.store.config_path().display(), "no existing configuration"),
            Some(cfg) if cfg.has_client_secret() && !cfg.registration_pending => {
                info!("already configured");
                return Ok(Outcome::AlreadyConfigured);
            }
            Some(cfg) if cfg.has_client_secret() => {
                info!("client secret already issued, retrying registration only");
                return self.register(identity, cfg.clone());
            }
            Some(_) => {}
        }

        if !existing.as_ref().is_some_and(|c| c.usable_token().is_some()) {
            self.pair(identity)?;
        }

        let mut cfg = self
            .store
            .load_config()?
            .ok_or_else(|| BootstrapError::ConfigNotPersisted {
                path: self.store.config_path().to_path_buf(),
            })?;
        reconcile_identity(&mut cfg, identity);
        report_fields(&cfg);

        if cfg.has_client_secret() {
            if cfg.registration_pending {
                return self.register(identity, cfg);
            }
            info!("paired configuration already carries a client secret");
            return Ok(Outcome::AlreadyConfigured);
        }

        let Some(token) = cfg.usable_token().map(str::to_string) else {
            info!("configuration carries no token yet, registration pending");
            return Ok(Outcome::AwaitingToken);
        };

        let secret = self.sso.exchange_token(&cfg, &token)?;
        cfg.complete_exchange(secret);
        self.store.save_config(&cfg)?;
        info!("client secret stored");

        self.register(identity, cfg)
    }

    /// Retry only the fleet-manager registration of an already-issued secret.
    pub fn register_only(&mut self) -> Result<Outcome, BootstrapError> {
        self.require_privilege()?;

        let identity = self
            .store
            .load_identity()?
            .ok_or(BootstrapError::NotRegistered)?;
        let cfg = self
            .store
            .load_config()?
            .filter(ManagerConfig::has_client_secret)
            .ok_or(BootstrapError::NotRegistered)?;

        self.register(identity, cfg)
    }

    fn require_privilege(&self) -> Result<(), BootstrapError> {
        if self.privilege.is_elevated() {
            Ok(())
        } else {
            Err(BootstrapError::PrivilegeRequired)
        }
    }

    fn vm_status(&mut self) -> VmStatus {
        if let Some(vm) = &self.vm {
            return vm.clone();
        }
        let vm = self.vm_probe.detect();
        if vm.in_vm {
            info!(hypervisor = %vm.hypervisor, "running in a VM ({})", vm.hypervisor);
        } else {
            info!("not running in a VM");
        }
        self.vm = Some(vm.clone());
        vm
    }

    fn pair(&mut self, identity: InstanceIdentity) -> Result<(), BootstrapError> {
        let vm = self.vm_status();
        if vm.in_vm {
            info!("virtual appliance must be registered manually in ZaaS Manager");
        } else {
            info!("appliance must be registered manually in ZaaS Manager");
        }

        let mut cfg = self.pairing.prompt_for_config(&identity)?;
        reconcile_identity(&mut cfg, identity);
        self.store.save_config(&cfg)?;
        info!(path = %self.store.config_path().display(), "configuration saved");
        Ok(())
    }

    fn register(
        &mut self,
        identity: InstanceIdentity,
        mut cfg: ManagerConfig,
    ) -> Result<Outcome, BootstrapError> {
        reconcile_identity(&mut cfg, identity);
        let vm = self.vm_status();
        let telemetry = self.telemetry.collect(identity, &cfg.hostname, vm);

        let ack = self.sso.register_instance(&cfg, &telemetry)?;
        info!(response = %ack.body, "fleet manager accepted registration");

        cfg.mark_registered();
        self.store.save_config(&cfg)?;
        info!(%identity, "instance registered");
        Ok(Outcome::Registered)
    }
}

fn reconcile_identity(cfg: &mut ManagerConfig, identity: InstanceIdentity) {
    if let Some(supplied) = cfg.adopt_identity(identity) {
        warn!(
            %supplied,
            local = %identity,
            "manager-supplied instance id differs from local identity, using local"
        );
    }
}

/// Which key fields are present. Token and secret values are never logged.
fn report_fields(cfg: &ManagerConfig) {
    info!(
        hostname = %cfg.hostname,
        manager_url = %cfg.manager_url,
        sso_provider = %cfg.sso.provider_url,
        client_id = %cfg.sso.client_id,
        token_present = cfg.usable_token().is_some(),
        "configuration loaded"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::{BTreeMap, VecDeque};

    use serde_json::json;
    use zaas_core::config::Settings;
    use zaas_core::telemetry::{
        CpuInfo, HostTelemetry, IoCounters, MemoryInfo, SwapInfo, SystemInfo,
    };

    use crate::sso::RegistrationAck;

    const OTHER_ID: &str = "6f1c2b8e-3d4a-4e7b-9a51-0c2d3e4f5a6b";

    struct Root(bool);

    impl Privilege for Root {
        fn is_elevated(&self) -> bool {
            self.0
        }
    }

    struct FixedVm(VmStatus);

    impl VmProbe for FixedVm {
        fn detect(&self) -> VmStatus {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct ScriptedPairing {
        documents: VecDeque<String>,
        prompts: usize,
    }

    impl PairingChannel for ScriptedPairing {
        fn prompt_for_config(
            &mut self,
            _identity: &InstanceIdentity,
        ) -> Result<ManagerConfig, BootstrapError> {
            self.prompts += 1;
            let doc = self.documents.pop_front().expect("unexpected pairing prompt");
            ManagerConfig::from_json(&doc).map_err(BootstrapError::InvalidPairingInput)
        }
    }

    struct FakeSso {
        secret: Option<&'static str>,
        register_status: Cell<u16>,
        exchanges: Cell<usize>,
        registrations: Cell<usize>,
        registered_ids: RefCell<Vec<InstanceIdentity>>,
    }

    impl FakeSso {
        fn new() -> Self {
            Self {
                secret: Some("abc"),
                register_status: Cell::new(200),
                exchanges: Cell::new(0),
                registrations: Cell::new(0),
                registered_ids: RefCell::new(Vec::new()),
            }
        }

        fn network_calls(&self) -> usize {
            self.exchanges.get() + self.registrations.get()
        }
    }

    impl SsoClient for FakeSso {
        fn exchange_token(
            &self,
            _cfg: &ManagerConfig,
            token: &str,
        ) -> Result<String, BootstrapError> {
            assert_eq!(token, "short-lived");
            self.exchanges.set(self.exchanges.get() + 1);
            match self.secret {
                Some(s) => Ok(s.to_string()),
                None => Err(BootstrapError::SsoProvider {
                    status: 400,
                    body: "{\"error\":\"invalid_client\"}".to_string(),
                }),
            }
        }

        fn register_instance(
            &self,
            cfg: &ManagerConfig,
            telemetry: &HostTelemetry,
        ) -> Result<RegistrationAck, BootstrapError> {
            assert!(cfg.has_client_secret());
            assert!(cfg.usable_token().is_none());
            self.registrations.set(self.registrations.get() + 1);
            self.registered_ids.borrow_mut().push(telemetry.instance_id);
            match self.register_status.get() {
                200 => Ok(RegistrationAck {
                    body: "ok".to_string(),
                }),
                status => Err(BootstrapError::ManagerRegistration {
                    status,
                    detail: "redirected to https://login.example.com".to_string(),
                }),
            }
        }
    }

    struct StubTelemetry;

    impl TelemetrySource for StubTelemetry {
        fn collect(
            &self,
            identity: InstanceIdentity,
            hostname: &str,
            vm: VmStatus,
        ) -> HostTelemetry {
            HostTelemetry {
                instance_id: identity,
                hostname: hostname.to_string(),
                collected_at: "2025-01-01T00:00:00Z".to_string(),
                system: SystemInfo::default(),
                cpu: CpuInfo::default(),
                memory: MemoryInfo::default(),
                swap: SwapInfo::default(),
                disks: BTreeMap::new(),
                io: IoCounters::default(),
                vm,
            }
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        store: IdentityStore,
        root: Root,
        vm: FixedVm,
        pairing: ScriptedPairing,
        sso: FakeSso,
        telemetry: StubTelemetry,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = IdentityStore::new(&Settings::in_dir(&dir.path().join("zaas")));
            Self {
                _dir: dir,
                store,
                root: Root(true),
                vm: FixedVm(VmStatus::virtualized("kvm")),
                pairing: ScriptedPairing::default(),
                sso: FakeSso::new(),
                telemetry: StubTelemetry,
            }
        }

        fn paste(&mut self, doc: String) {
            self.pairing.documents.push_back(doc);
        }

        fn run(&mut self) -> Result<Outcome, BootstrapError> {
            Bootstrap::new(
                &self.store,
                &self.root,
                &self.vm,
                &mut self.pairing,
                &self.sso,
                &self.telemetry,
            )
            .run()
        }

        fn register_only(&mut self) -> Result<Outcome, BootstrapError> {
            Bootstrap::new(
                &self.store,
                &self.root,
                &self.vm,
                &mut self.pairing,
                &self.sso,
                &self.telemetry,
            )
            .register_only()
        }

        fn saved(&self) -> ManagerConfig {
            self.store.load_config().unwrap().expect("config on disk")
        }
    }

    fn document(token: Option<&str>, secret: Option<&str>, uuid: Option<&str>) -> String {
        let mut sso = json!({
            "provider_url": "https://sso.example.com",
            "registration_path": "/realms/zaas/clients",
            "token_path": "/token",
            "client_id": "edge-proxy-01",
        });
        if let Some(t) = token {
            sso["token"] = json!(t);
        }
        if let Some(s) = secret {
            sso["client_secret"] = json!(s);
        }
        let mut doc = json!({
            "manager_url": "https://manager.example.com",
            "api_path": "/api/v1/instances",
            "hostname": "edge-proxy-01",
            "sso": sso,
        });
        if let Some(u) = uuid {
            doc["uuid"] = json!(u);
        }
        doc.to_string()
    }

    #[test]
    fn test_pairing_without_token_leaves_registration_pending() {
        let mut h = Harness::new();
        h.paste(document(None, None, None));

        assert_eq!(h.run().unwrap(), Outcome::AwaitingToken);
        assert_eq!(h.pairing.prompts, 1);
        assert_eq!(h.sso.network_calls(), 0);

        let identity = h.store.load_identity().unwrap().unwrap();
        let saved = h.saved();
        assert_eq!(saved.instance_id, Some(identity));
        assert!(!saved.has_client_secret());

        // A later run with a token completes exchange and registration.
        h.paste(document(Some("short-lived"), None, None));
        assert_eq!(h.run().unwrap(), Outcome::Registered);
        assert_eq!(h.pairing.prompts, 2);
        assert_eq!(h.sso.exchanges.get(), 1);
        assert_eq!(h.sso.registrations.get(), 1);
        assert_eq!(h.sso.registered_ids.borrow()[0], identity);
    }

    #[test]
    fn test_secret_present_short_circuits() {
        let mut h = Harness::new();
        let cfg = ManagerConfig::from_json(&document(None, Some("abc"), None)).unwrap();
        h.store.save_config(&cfg).unwrap();

        assert_eq!(h.run().unwrap(), Outcome::AlreadyConfigured);
        assert_eq!(h.sso.network_calls(), 0);
        assert_eq!(h.pairing.prompts, 0);
        assert_eq!(h.saved(), cfg);
    }

    #[test]
    fn test_full_run_is_idempotent() {
        let mut h = Harness::new();
        h.paste(document(Some("short-lived"), None, None));

        assert_eq!(h.run().unwrap(), Outcome::Registered);
        let identity = h.store.load_identity().unwrap();
        let first = h.saved();

        assert_eq!(h.run().unwrap(), Outcome::AlreadyConfigured);
        assert_eq!(h.sso.exchanges.get(), 1);
        assert_eq!(h.sso.registrations.get(), 1);
        assert_eq!(h.store.load_identity().unwrap(), identity);
        assert_eq!(h.saved(), first);
    }

    #[test]
    fn test_exchange_clears_token_and_stores_secret() {
        let mut h = Harness::new();
        h.paste(document(Some("short-lived"), None, None));
        h.run().unwrap();

        let saved = h.saved();
        assert!(saved.usable_token().is_none());
        assert_eq!(saved.sso.client_secret.as_deref(), Some("abc"));
        assert!(!saved.registration_pending);
    }

    #[test]
    fn test_token_already_on_disk_skips_pairing() {
        let mut h = Harness::new();
        let cfg = ManagerConfig::from_json(&document(Some("short-lived"), None, None)).unwrap();
        h.store.save_config(&cfg).unwrap();

        assert_eq!(h.run().unwrap(), Outcome::Registered);
        assert_eq!(h.pairing.prompts, 0);
    }

    #[test]
    fn test_provider_rejection_leaves_config_unchanged() {
        let mut h = Harness::new();
        h.sso.secret = None;
        let cfg = ManagerConfig::from_json(&document(Some("short-lived"), None, None)).unwrap();
        h.store.save_config(&cfg).unwrap();
        let before = std::fs::read_to_string(h.store.config_path()).unwrap();

        match h.run().unwrap_err() {
            BootstrapError::SsoProvider { status, .. } => assert_eq!(status, 400),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(h.sso.registrations.get(), 0);
        assert_eq!(std::fs::read_to_string(h.store.config_path()).unwrap(), before);
    }

    #[test]
    fn test_failed_registration_retries_without_new_exchange() {
        let mut h = Harness::new();
        h.sso.register_status.set(302);
        h.paste(document(Some("short-lived"), None, None));

        match h.run().unwrap_err() {
            BootstrapError::ManagerRegistration { status, .. } => assert_eq!(status, 302),
            other => panic!("unexpected error: {other}"),
        }
        let saved = h.saved();
        assert!(saved.has_client_secret());
        assert!(saved.usable_token().is_none());
        assert!(saved.registration_pending);

        h.sso.register_status.set(200);
        assert_eq!(h.run().unwrap(), Outcome::Registered);
        assert_eq!(h.sso.exchanges.get(), 1);
        assert_eq!(h.sso.registrations.get(), 2);
        assert_eq!(h.pairing.prompts, 1);
        assert!(!h.saved().registration_pending);

        assert_eq!(h.run().unwrap(), Outcome::AlreadyConfigured);
        assert_eq!(h.sso.network_calls(), 3);
    }

    #[test]
    fn test_unprivileged_run_touches_nothing() {
        let mut h = Harness::new();
        h.root = Root(false);

        assert!(matches!(h.run(), Err(BootstrapError::PrivilegeRequired)));
        assert!(!h.store.identity_path().exists());
        assert!(matches!(
            h.register_only(),
            Err(BootstrapError::PrivilegeRequired)
        ));
    }

    #[test]
    fn test_local_identity_wins_over_supplied_one() {
        let mut h = Harness::new();
        h.paste(document(Some("short-lived"), None, Some(OTHER_ID)));

        assert_eq!(h.run().unwrap(), Outcome::Registered);
        let identity = h.store.load_identity().unwrap().unwrap();
        assert_ne!(identity.to_string(), OTHER_ID);
        assert_eq!(h.saved().instance_id, Some(identity));
        assert_eq!(h.sso.registered_ids.borrow()[0], identity);
    }

    #[test]
    fn test_paste_with_secret_is_already_configured() {
        let mut h = Harness::new();
        h.paste(document(None, Some("abc"), None));

        assert_eq!(h.run().unwrap(), Outcome::AlreadyConfigured);
        assert_eq!(h.sso.network_calls(), 0);
        let identity = h.store.load_identity().unwrap();
        assert_eq!(h.saved().instance_id, identity);
    }

    #[test]
    fn test_pending_retry_registers_with_local_identity() {
        let mut h = Harness::new();
        let mut cfg =
            ManagerConfig::from_json(&document(Some("short-lived"), None, Some(OTHER_ID))).unwrap();
        cfg.complete_exchange("abc".to_string());
        h.store.save_config(&cfg).unwrap();

        assert_eq!(h.run().unwrap(), Outcome::Registered);
        let identity = h.store.load_identity().unwrap().unwrap();
        assert_eq!(h.sso.registered_ids.borrow()[0], identity);
        assert_eq!(h.saved().instance_id, Some(identity));
        assert_eq!(h.sso.exchanges.get(), 0);
    }

    #[test]
    fn test_invalid_paste_is_fatal_and_not_saved() {
        let mut h = Harness::new();
        h.paste("{\"manager_url\": 42}".to_string());

        assert!(matches!(
            h.run(),
            Err(BootstrapError::InvalidPairingInput(_))
        ));
        assert!(h.store.load_config().unwrap().is_none());
        // The identity survives for the next attempt.
        assert!(h.store.load_identity().unwrap().is_some());
    }

    #[test]
    fn test_register_only_requires_secret() {
        let mut h = Harness::new();
        assert!(matches!(
            h.register_only(),
            Err(BootstrapError::NotRegistered)
        ));

        h.paste(document(None, None, None));
        h.run().unwrap();
        assert!(matches!(
            h.register_only(),
            Err(BootstrapError::NotRegistered)
        ));
        assert_eq!(h.sso.network_calls(), 0);
    }

    #[test]
    fn test_register_only_resends_registration() {
        let mut h = Harness::new();
        h.paste(document(Some("short-lived"), None, None));
        h.run().unwrap();

        assert_eq!(h.register_only().unwrap(), Outcome::Registered);
        assert_eq!(h.sso.exchanges.get(), 1);
        assert_eq!(h.sso.registrations.get(), 2);
    }
}
