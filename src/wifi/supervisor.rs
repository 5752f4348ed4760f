//! Boot-time connection supervisor.
//!
//! Decides which credential to use and keeps trying until the device is on
//! the network:
//!
//! 1. stored credential, if a complete one is in flash
//! 2. otherwise poll the BLE pending buffers until both are filled
//! 3. enable station mode
//! 4. join, sleeping a fixed backoff between failures, without a retry limit
//! 5. persist a BLE-provisioned credential once it has joined
//!
//! Everything blocks; the caller runs this on the main task.

use super::connection::{AuthMode, JoinError, NetworkJoin};
use super::flash::FlashDriver;
use super::storage::{CredentialStore, StorageError};
use crate::ble::{Characteristic, PendingCredentials};
use crate::config::{Credential, ProvisioningConfig};
use crate::delay::Delay;
use log::{debug, error, info, warn};
use std::fmt;
use std::time::Duration;

/// Where the credential in use came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Loaded from flash.
    Stored,
    /// Received over BLE during this boot.
    Provisioned,
}

/// State of the join procedure, returned once connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionAttempt {
    /// Credential in use.
    pub credentials: Option<Credential>,
    /// Origin of `credentials`.
    pub source: Option<CredentialSource>,
    /// Set once a join succeeded.
    pub connected: bool,
    /// Join attempts made so far (1-based after the first try).
    pub attempt: u32,
}

impl ConnectionAttempt {
    fn new() -> Self {
        Self {
            credentials: None,
            source: None,
            connected: false,
            attempt: 0,
        }
    }
}

/// Drives the device from boot to a joined network.
pub struct ConnectionSupervisor<F, N, D> {
    store: CredentialStore<F>,
    pending: PendingCredentials,
    network: N,
    delay: D,
    poll_interval: Duration,
    provisioning_timeout: Option<Duration>,
    join_timeout: Duration,
    retry_backoff: Duration,
    persist_provisioned: bool,
}

impl<F, N, D> ConnectionSupervisor<F, N, D>
where
    F: FlashDriver,
    N: NetworkJoin,
    D: Delay,
{
    /// Create a supervisor using the timing from `config`.
    pub fn new(
        store: CredentialStore<F>,
        pending: PendingCredentials,
        network: N,
        delay: D,
        config: &ProvisioningConfig,
    ) -> Self {
        Self {
            store,
            pending,
            network,
            delay,
            poll_interval: config.poll_interval,
            provisioning_timeout: config.provisioning_timeout,
            join_timeout: config.join_timeout,
            retry_backoff: config.retry_backoff,
            persist_provisioned: config.persist_provisioned,
        }
    }

    /// Run until connected.
    ///
    /// Join failures are retried forever. Errors are returned only for
    /// station-mode failure, a failed save, or an expired provisioning
    /// timeout.
    pub fn run(&mut self) -> Result<ConnectionAttempt, SupervisorError> {
        let mut state = ConnectionAttempt::new();

        let (credential, source) = match self.stored_credential() {
            Some(credential) => (credential, CredentialSource::Stored),
            None => (self.wait_for_provisioning()?, CredentialSource::Provisioned),
        };
        info!(
            "Using {:?} credentials for '{}'",
            source,
            credential.ssid()
        );

        self.network
            .enable_station_mode()
            .map_err(SupervisorError::StationMode)?;

        let auth = AuthMode::for_credential(&credential);
        loop {
            state.attempt += 1;
            info!(
                "Joining '{}' (attempt {})",
                credential.ssid(),
                state.attempt
            );
            match self
                .network
                .join_with_timeout(&credential, auth, self.join_timeout)
            {
                Ok(()) => break,
                Err(e) => {
                    warn!(
                        "Join attempt {} failed: {}, retrying in {:?}",
                        state.attempt, e, self.retry_backoff
                    );
                    self.delay.sleep(self.retry_backoff);
                }
            }
        }
        state.connected = true;
        info!("Connected after {} attempt(s)", state.attempt);

        if source == CredentialSource::Provisioned && self.persist_provisioned {
            self.store.save(&credential).map_err(|e| {
                error!("Failed to persist credentials: {}", e);
                SupervisorError::Storage(e)
            })?;
        }

        state.credentials = Some(credential);
        state.source = Some(source);
        Ok(state)
    }

    fn stored_credential(&self) -> Option<Credential> {
        match self.store.load() {
            Some(credential) if credential.is_complete() => Some(credential),
            Some(credential) => {
                warn!(
                    "Ignoring incomplete stored credentials for '{}'",
                    credential.ssid()
                );
                None
            }
            None => None,
        }
    }

    fn wait_for_provisioning(&mut self) -> Result<Credential, SupervisorError> {
        info!("No stored credentials, waiting for BLE provisioning");
        let mut waited = Duration::ZERO;
        let mut stalled = false;

        loop {
            if let Some(credential) = self.pending.credential() {
                info!("Received credentials for '{}'", credential.ssid());
                return Ok(credential);
            }

            // Both buffers filled but not usable, e.g. a long write that
            // stopped inside a multi-byte character.
            if self.pending.is_complete() {
                if !stalled {
                    warn!(
                        "Pending credentials are not valid UTF-8 (SSID {} bytes, password {} bytes), waiting for a rewrite",
                        self.pending.len(Characteristic::Ssid),
                        self.pending.len(Characteristic::Password)
                    );
                    stalled = true;
                }
            } else {
                stalled = false;
            }

            if let Some(limit) = self.provisioning_timeout {
                if waited >= limit {
                    return Err(SupervisorError::ProvisioningTimeout(limit));
                }
            }

            debug!("Waiting for credentials ({:?} elapsed)", waited);
            self.delay.sleep(self.poll_interval);
            waited += self.poll_interval;
        }
    }

    /// Borrow the credential store.
    pub fn store(&self) -> &CredentialStore<F> {
        &self.store
    }

    /// Borrow the network driver.
    pub fn network(&self) -> &N {
        &self.network
    }

    /// Tear down, returning the network driver.
    pub fn into_network(self) -> N {
        self.network
    }
}

/// Fatal supervisor errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// Saving the provisioned credential failed.
    Storage(StorageError),
    /// Station mode could not be enabled.
    StationMode(JoinError),
    /// No complete credential arrived in time.
    ProvisioningTimeout(Duration),
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {}", e),
            Self::StationMode(e) => write!(f, "cannot enable station mode: {}", e),
            Self::ProvisioningTimeout(t) => {
                write!(f, "no credentials provisioned within {:?}", t)
            }
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::StationMode(e) => Some(e),
            Self::ProvisioningTimeout(_) => None,
        }
    }
}

impl From<StorageError> for SupervisorError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::WriteError;
    use crate::wifi::flash::MemoryFlash;

    const OFFSET: u32 = 0x3F_F000;

    /// Network fake failing the first `failures` joins.
    #[derive(Default)]
    struct FakeNetwork {
        failures: u32,
        station_error: Option<JoinError>,
        station_enabled: bool,
        joins: Vec<(String, AuthMode, Duration)>,
    }

    impl NetworkJoin for FakeNetwork {
        fn enable_station_mode(&mut self) -> Result<(), JoinError> {
            if let Some(e) = self.station_error.clone() {
                return Err(e);
            }
            self.station_enabled = true;
            Ok(())
        }

        fn join_with_timeout(
            &mut self,
            credential: &Credential,
            auth: AuthMode,
            timeout: Duration,
        ) -> Result<(), JoinError> {
            assert!(self.station_enabled, "join before station mode");
            self.joins
                .push((credential.ssid().to_string(), auth, timeout));
            if self.failures > 0 {
                self.failures -= 1;
                Err(JoinError::Timeout)
            } else {
                Ok(())
            }
        }
    }

    /// Delay recording sleeps; fills the pending buffers after
    /// `provision_after` sleeps.
    #[derive(Default)]
    struct ScriptedDelay {
        sleeps: Vec<Duration>,
        pending: Option<PendingCredentials>,
        provision_after: usize,
    }

    impl Delay for ScriptedDelay {
        fn sleep(&mut self, duration: Duration) {
            self.sleeps.push(duration);
            if let Some(pending) = &self.pending {
                if self.sleeps.len() == self.provision_after {
                    pending.write(Characteristic::Ssid, 0, b"Home-WiFi").unwrap();
                } else if self.sleeps.len() == self.provision_after + 1 {
                    pending.write(Characteristic::Password, 0, b"s3cr3t!").unwrap();
                }
            }
        }
    }

    /// Delay replaying client writes: `steps[i]` runs on sleep `i + 1`.
    struct ClientScript {
        sleeps: usize,
        pending: PendingCredentials,
        steps: Vec<Vec<(Characteristic, usize, &'static [u8])>>,
        results: Vec<Result<usize, WriteError>>,
    }

    impl ClientScript {
        fn new(
            pending: &PendingCredentials,
            steps: Vec<Vec<(Characteristic, usize, &'static [u8])>>,
        ) -> Self {
            Self {
                sleeps: 0,
                pending: pending.clone(),
                steps,
                results: Vec::new(),
            }
        }
    }

    impl Delay for ClientScript {
        fn sleep(&mut self, _duration: Duration) {
            self.sleeps += 1;
            if let Some(step) = self.steps.get(self.sleeps - 1) {
                for &(characteristic, offset, data) in step {
                    self.results
                        .push(self.pending.write(characteristic, offset, data));
                }
            }
        }
    }

    fn stored_store(credential: &Credential) -> CredentialStore<MemoryFlash> {
        let mut store = CredentialStore::new(MemoryFlash::new(), OFFSET);
        store.save(credential).unwrap();
        store
    }

    #[test]
    fn test_stored_credentials_skip_provisioning() {
        let credential = Credential::new("Home-WiFi", "s3cr3t!").unwrap();
        let pending = PendingCredentials::new();
        let mut delay = ScriptedDelay::default();
        let mut supervisor = ConnectionSupervisor::new(
            stored_store(&credential),
            pending,
            FakeNetwork::default(),
            &mut delay,
            &ProvisioningConfig::default(),
        );

        let attempt = supervisor.run().unwrap();

        assert!(attempt.connected);
        assert_eq!(attempt.attempt, 1);
        assert_eq!(attempt.credentials, Some(credential));
        assert_eq!(attempt.source, Some(CredentialSource::Stored));
        assert_eq!(
            supervisor.network().joins,
            vec![(
                "Home-WiFi".to_string(),
                AuthMode::Wpa2Personal,
                Duration::from_millis(5000)
            )]
        );
        // Already stored: not rewritten.
        assert_eq!(supervisor.store().flash().erase_count(OFFSET), 1);
        drop(supervisor);
        assert!(delay.sleeps.is_empty());
    }

    #[test]
    fn test_waits_for_both_buffers() {
        let pending = PendingCredentials::new();
        let mut delay = ScriptedDelay {
            pending: Some(pending.clone()),
            provision_after: 3,
            ..Default::default()
        };
        let mut supervisor = ConnectionSupervisor::new(
            CredentialStore::new(MemoryFlash::new(), OFFSET),
            pending,
            FakeNetwork::default(),
            &mut delay,
            &ProvisioningConfig::default(),
        );

        let attempt = supervisor.run().unwrap();

        assert!(attempt.connected);
        assert_eq!(attempt.source, Some(CredentialSource::Provisioned));
        assert_eq!(supervisor.network().joins.len(), 1);
        drop(supervisor);
        // SSID arrives on poll 3, password on poll 4: no join before both.
        assert_eq!(delay.sleeps, vec![Duration::from_millis(1000); 4]);
    }

    #[test]
    fn test_retries_with_backoff() {
        let credential = Credential::new("Home-WiFi", "s3cr3t!").unwrap();
        let mut delay = ScriptedDelay::default();
        let network = FakeNetwork {
            failures: 3,
            ..Default::default()
        };
        let mut supervisor = ConnectionSupervisor::new(
            stored_store(&credential),
            PendingCredentials::new(),
            network,
            &mut delay,
            &ProvisioningConfig::default(),
        );

        let attempt = supervisor.run().unwrap();

        assert!(attempt.connected);
        assert_eq!(attempt.attempt, 4);
        assert_eq!(supervisor.network().joins.len(), 4);
        drop(supervisor);
        assert_eq!(delay.sleeps, vec![Duration::from_millis(5000); 3]);
    }

    #[test]
    fn test_provisioned_credentials_persisted() {
        let pending = PendingCredentials::new();
        pending.write(Characteristic::Ssid, 0, b"Home-WiFi").unwrap();
        pending.write(Characteristic::Password, 0, b"s3cr3t!").unwrap();

        let mut supervisor = ConnectionSupervisor::new(
            CredentialStore::new(MemoryFlash::new(), OFFSET),
            pending,
            FakeNetwork::default(),
            ScriptedDelay::default(),
            &ProvisioningConfig::default(),
        );

        supervisor.run().unwrap();

        let saved = supervisor.store().load().unwrap();
        assert_eq!(saved.ssid(), "Home-WiFi");
        assert_eq!(saved.password(), "s3cr3t!");
    }

    #[test]
    fn test_persist_disabled() {
        let pending = PendingCredentials::new();
        pending.write(Characteristic::Ssid, 0, b"Net").unwrap();
        pending.write(Characteristic::Password, 0, b"pw").unwrap();
        let mut config = ProvisioningConfig::default();
        config.persist_provisioned = false;

        let mut supervisor = ConnectionSupervisor::new(
            CredentialStore::new(MemoryFlash::new(), OFFSET),
            pending,
            FakeNetwork::default(),
            ScriptedDelay::default(),
            &config,
        );

        supervisor.run().unwrap();
        assert_eq!(supervisor.store().load(), None);
    }

    #[test]
    fn test_provisioning_timeout() {
        let config =
            ProvisioningConfig::default().with_provisioning_timeout(Duration::from_millis(3000));
        let mut delay = ScriptedDelay::default();
        let mut supervisor = ConnectionSupervisor::new(
            CredentialStore::new(MemoryFlash::new(), OFFSET),
            PendingCredentials::new(),
            FakeNetwork::default(),
            &mut delay,
            &config,
        );

        let result = supervisor.run();

        assert_eq!(
            result,
            Err(SupervisorError::ProvisioningTimeout(Duration::from_millis(3000)))
        );
        assert!(supervisor.network().joins.is_empty());
        drop(supervisor);
        assert_eq!(delay.sleeps.len(), 3);
    }

    #[test]
    fn test_station_mode_failure_is_fatal() {
        let credential = Credential::new("Net", "pw").unwrap();
        let network = FakeNetwork {
            station_error: Some(JoinError::Driver("radio off".into())),
            ..Default::default()
        };
        let mut supervisor = ConnectionSupervisor::new(
            stored_store(&credential),
            PendingCredentials::new(),
            network,
            ScriptedDelay::default(),
            &ProvisioningConfig::default(),
        );

        assert!(matches!(
            supervisor.run(),
            Err(SupervisorError::StationMode(JoinError::Driver(_)))
        ));
        assert!(supervisor.network().joins.is_empty());
    }

    #[test]
    fn test_incomplete_stored_credential_ignored() {
        let mut store = CredentialStore::new(MemoryFlash::new(), OFFSET);
        store.flash_mut().poke(OFFSET, b"OpenNet\0\0");

        let pending = PendingCredentials::new();
        let mut delay = ScriptedDelay {
            pending: Some(pending.clone()),
            provision_after: 1,
            ..Default::default()
        };
        let mut supervisor = ConnectionSupervisor::new(
            store,
            pending,
            FakeNetwork::default(),
            &mut delay,
            &ProvisioningConfig::default(),
        );

        let attempt = supervisor.run().unwrap();
        assert_eq!(attempt.source, Some(CredentialSource::Provisioned));
        assert_eq!(
            attempt.credentials.as_ref().map(Credential::ssid),
            Some("Home-WiFi")
        );
    }

    #[test]
    fn test_failed_save_is_fatal() {
        let pending = PendingCredentials::new();
        pending.write(Characteristic::Ssid, 0, b"Net").unwrap();
        pending.write(Characteristic::Password, 0, b"pw").unwrap();
        let mut store = CredentialStore::new(MemoryFlash::new(), OFFSET);
        store.flash_mut().fail_next_erase();

        let mut supervisor = ConnectionSupervisor::new(
            store,
            pending,
            FakeNetwork::default(),
            ScriptedDelay::default(),
            &ProvisioningConfig::default(),
        );

        assert!(matches!(
            supervisor.run(),
            Err(SupervisorError::Storage(StorageError::EraseFailed(_)))
        ));
    }

    #[test]
    fn test_truncated_ssid_write_rejected_then_rewritten() {
        let pending = PendingCredentials::new();
        let mut script = ClientScript::new(
            &pending,
            vec![
                vec![
                    (Characteristic::Ssid, 0, &b"Net\xC3"[..]),
                    (Characteristic::Password, 0, &b"pw"[..]),
                ],
                vec![(Characteristic::Ssid, 0, &b"Net"[..])],
            ],
        );
        let mut supervisor = ConnectionSupervisor::new(
            CredentialStore::new(MemoryFlash::new(), OFFSET),
            pending,
            FakeNetwork::default(),
            &mut script,
            &ProvisioningConfig::default(),
        );

        let attempt = supervisor.run().unwrap();

        assert_eq!(
            attempt.credentials.as_ref().map(Credential::ssid),
            Some("Net")
        );
        assert_eq!(supervisor.network().joins.len(), 1);
        drop(supervisor);
        assert_eq!(script.sleeps, 2);
        assert_eq!(script.results, vec![Err(WriteError::InvalidUtf8), Ok(2), Ok(3)]);
    }

    #[test]
    fn test_unfinished_long_write_times_out_without_join() {
        let pending = PendingCredentials::new();
        pending.write(Characteristic::Ssid, 0, b"Net").unwrap();
        pending.write(Characteristic::Ssid, 3, b"\xC3").unwrap();
        pending.write(Characteristic::Password, 0, b"pw").unwrap();
        assert!(pending.is_complete());

        let config =
            ProvisioningConfig::default().with_provisioning_timeout(Duration::from_millis(2000));
        let mut supervisor = ConnectionSupervisor::new(
            CredentialStore::new(MemoryFlash::new(), OFFSET),
            pending,
            FakeNetwork::default(),
            ScriptedDelay::default(),
            &config,
        );

        assert_eq!(
            supervisor.run(),
            Err(SupervisorError::ProvisioningTimeout(Duration::from_millis(2000)))
        );
        assert!(supervisor.network().joins.is_empty());
    }
}
