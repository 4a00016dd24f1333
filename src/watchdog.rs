//! Poll-detect-restart-notify loop around a single spot instance.

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::gce::{ComputeProvider, InstanceState};
use crate::health::HealthServer;
use crate::notify::Notifier;

/// Watchdog driving the restart cycle on a fixed interval.
///
/// Ticks are strictly sequential: a tick runs to completion before the next
/// one begins, so the notification flag needs no synchronization. Any
/// provider or notifier failure aborts the loop; the caller exits the
/// process.
pub struct SpotWatchdog<P, N> {
    provider: P,
    notifier: N,
    config: Config,
    health_server: HealthServer,
    notify_pending: bool,
}

impl<P: ComputeProvider, N: Notifier> SpotWatchdog<P, N> {
    pub fn new(provider: P, notifier: N, config: Config, health_server: HealthServer) -> Self {
        Self {
            provider,
            notifier,
            config,
            health_server,
            notify_pending: false,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        // Prove the instance is reachable before reporting ready.
        self.provider.get_instance().await?;
        info!(
            instance_name = %self.config.instance_name,
            "Compute API connectivity check passed"
        );
        self.health_server.set_ready(true);

        info!(
            instance_name = %self.config.instance_name,
            polling_rate_seconds = self.config.polling_rate.as_secs(),
            "Starting polling loop"
        );

        let mut ticker = interval(self.config.polling_rate);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick fires immediately; skip it so the first
        // check happens one full period after startup, like a plain timer.
        ticker.tick().await;

        let mut check_count = 0u64;
        loop {
            ticker.tick().await;
            check_count += 1;
            debug!(check_number = check_count, "Starting check cycle");
            self.tick().await?;
        }
    }

    /// One full check cycle: status fetch, restart when terminated, public IP
    /// resolution, and a notification when a restart just completed.
    async fn tick(&mut self) -> Result<()> {
        let instance = self.provider.get_instance().await?;

        let restarted = match instance.state() {
            InstanceState::Terminated => {
                info!(
                    instance_name = %self.config.instance_name,
                    "Instance is terminated, starting it"
                );

                let operation = self.provider.start_instance().await?;
                self.provider.wait_operation(&operation).await?;
                self.notify_pending = true;

                info!(
                    instance_name = %self.config.instance_name,
                    operation = %operation.name,
                    "Start operation completed"
                );
                true
            }
            InstanceState::Running | InstanceState::Other => {
                debug!(
                    instance_name = %self.config.instance_name,
                    status = %instance.status,
                    "Instance is not terminated, no action"
                );
                false
            }
        };

        // A restart changes the network configuration, so read it back fresh.
        let instance = if restarted {
            self.provider.get_instance().await?
        } else {
            instance
        };

        let public_ip = instance.public_ip().unwrap_or_default().to_string();
        if public_ip.is_empty() {
            warn!(
                instance_name = %self.config.instance_name,
                status = %instance.status,
                "Instance has no public IP on any interface"
            );
        } else {
            info!(
                instance_name = %self.config.instance_name,
                status = %instance.status,
                public_ip = %public_ip,
                "Instance observed"
            );
        }

        if self.notify_pending {
            // Cleared before the attempt so the flag never survives a tick,
            // whatever the outcome of the send.
            self.notify_pending = false;
            self.notifier.send_new_ip(&public_ip).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmtpConfig;
    use crate::error::RestarterError;
    use crate::gce::{Instance, Operation};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            project_id: "my-project".to_string(),
            zone: "us-central1-a".to_string(),
            instance_name: "proxy-1".to_string(),
            credentials_file: PathBuf::from("/app/credentials.json"),
            polling_rate: Duration::from_secs(60),
            smtp: SmtpConfig {
                sender: "sender@example.com".to_string(),
                receiver: "ops@example.com".to_string(),
                password: "secret".to_string(),
                server: "smtp.example.com".to_string(),
                port: 587,
            },
        }
    }

    fn running_instance(nat_ip: &str) -> Instance {
        serde_json::from_value(json!({
            "status": "RUNNING",
            "networkInterfaces": [{"accessConfigs": [{"natIP": nat_ip}]}]
        }))
        .unwrap()
    }

    fn terminated_instance() -> Instance {
        serde_json::from_value(json!({"status": "TERMINATED"})).unwrap()
    }

    fn start_operation() -> Operation {
        serde_json::from_value(json!({"name": "operation-12345", "status": "RUNNING"})).unwrap()
    }

    #[derive(Default)]
    struct MockCompute {
        /// Scripted responses for successive get_instance calls
        instances: Mutex<VecDeque<Instance>>,
        fail_get: bool,
        fail_wait: bool,
        get_calls: AtomicUsize,
        start_calls: AtomicUsize,
        wait_calls: AtomicUsize,
    }

    impl MockCompute {
        fn with_instances(instances: Vec<Instance>) -> Self {
            Self {
                instances: Mutex::new(instances.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ComputeProvider for MockCompute {
        async fn get_instance(&self) -> Result<Instance> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_get {
                return Err(RestarterError::provider("instances.get", "HTTP 500"));
            }
            Ok(self
                .instances
                .lock()
                .unwrap()
                .pop_front()
                .expect("mock ran out of scripted instances"))
        }

        async fn start_instance(&self) -> Result<Operation> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            Ok(start_operation())
        }

        async fn wait_operation(&self, operation: &Operation) -> Result<()> {
            self.wait_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_wait {
                return Err(RestarterError::OperationFailed {
                    name: operation.name.clone(),
                    message: "ZONE_RESOURCE_POOL_EXHAUSTED".to_string(),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockNotifier {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for MockNotifier {
        async fn send_new_ip(&self, public_ip: &str) -> Result<()> {
            self.sent.lock().unwrap().push(public_ip.to_string());
            if self.fail {
                return Err(RestarterError::notification("connection refused"));
            }
            Ok(())
        }
    }

    fn watchdog(
        provider: MockCompute,
        notifier: MockNotifier,
    ) -> SpotWatchdog<MockCompute, MockNotifier> {
        SpotWatchdog::new(provider, notifier, test_config(), HealthServer::new())
    }

    #[tokio::test]
    async fn test_running_instance_triggers_no_restart_and_no_email() {
        let provider = MockCompute::with_instances(vec![running_instance("1.2.3.4")]);
        let notifier = MockNotifier::default();
        let mut watchdog = watchdog(provider, notifier);

        watchdog.tick().await.unwrap();

        assert_eq!(watchdog.provider.start_calls.load(Ordering::SeqCst), 0);
        assert!(watchdog.notifier.sent.lock().unwrap().is_empty());
        assert!(!watchdog.notify_pending);
    }

    #[tokio::test]
    async fn test_other_state_triggers_no_restart() {
        let instance: Instance =
            serde_json::from_value(json!({"status": "STOPPING"})).unwrap();
        let provider = MockCompute::with_instances(vec![instance]);
        let mut watchdog = watchdog(provider, MockNotifier::default());

        watchdog.tick().await.unwrap();

        assert_eq!(watchdog.provider.start_calls.load(Ordering::SeqCst), 0);
        assert!(watchdog.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminated_instance_is_restarted_and_notified_once() {
        let provider = MockCompute::with_instances(vec![
            terminated_instance(),
            running_instance("1.2.3.4"),
        ]);
        let mut watchdog = watchdog(provider, MockNotifier::default());

        watchdog.tick().await.unwrap();

        assert_eq!(watchdog.provider.start_calls.load(Ordering::SeqCst), 1);
        assert_eq!(watchdog.provider.wait_calls.load(Ordering::SeqCst), 1);
        // One fetch for the status check, one fresh read after the restart
        assert_eq!(watchdog.provider.get_calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *watchdog.notifier.sent.lock().unwrap(),
            vec!["1.2.3.4".to_string()]
        );
        assert!(!watchdog.notify_pending);
    }

    #[tokio::test]
    async fn test_notification_body_is_empty_without_public_ip() {
        let restarted: Instance = serde_json::from_value(json!({
            "status": "RUNNING",
            "networkInterfaces": [{"accessConfigs": []}]
        }))
        .unwrap();
        let provider = MockCompute::with_instances(vec![terminated_instance(), restarted]);
        let mut watchdog = watchdog(provider, MockNotifier::default());

        watchdog.tick().await.unwrap();

        assert_eq!(*watchdog.notifier.sent.lock().unwrap(), vec![String::new()]);
    }

    #[tokio::test]
    async fn test_status_fetch_error_aborts_before_any_other_call() {
        let provider = MockCompute {
            fail_get: true,
            ..Default::default()
        };
        let mut watchdog = watchdog(provider, MockNotifier::default());

        let err = watchdog.tick().await.unwrap_err();

        assert!(matches!(err, RestarterError::Provider { .. }));
        assert_eq!(watchdog.provider.start_calls.load(Ordering::SeqCst), 0);
        assert_eq!(watchdog.provider.wait_calls.load(Ordering::SeqCst), 0);
        assert!(watchdog.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_operation_wait_does_not_notify() {
        let provider = MockCompute {
            instances: Mutex::new(VecDeque::from(vec![terminated_instance()])),
            fail_wait: true,
            ..Default::default()
        };
        let mut watchdog = watchdog(provider, MockNotifier::default());

        let err = watchdog.tick().await.unwrap_err();

        assert!(matches!(err, RestarterError::OperationFailed { .. }));
        assert!(watchdog.notifier.sent.lock().unwrap().is_empty());
        assert!(!watchdog.notify_pending);
    }

    #[tokio::test]
    async fn test_flag_is_cleared_even_when_notification_fails() {
        let provider = MockCompute::with_instances(vec![
            terminated_instance(),
            running_instance("1.2.3.4"),
        ]);
        let notifier = MockNotifier {
            fail: true,
            ..Default::default()
        };
        let mut watchdog = watchdog(provider, notifier);

        let err = watchdog.tick().await.unwrap_err();

        assert!(matches!(err, RestarterError::Notification(_)));
        assert_eq!(watchdog.notifier.sent.lock().unwrap().len(), 1);
        assert!(!watchdog.notify_pending);
    }

    #[tokio::test]
    async fn test_run_stays_unready_when_connectivity_check_fails() {
        let provider = MockCompute {
            fail_get: true,
            ..Default::default()
        };
        let mut watchdog = watchdog(provider, MockNotifier::default());

        let err = watchdog.run().await.unwrap_err();

        assert!(matches!(err, RestarterError::Provider { .. }));
        assert!(!watchdog.health_server.is_ready());
        assert_eq!(watchdog.provider.start_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_second_notification_on_following_tick() {
        let provider = MockCompute::with_instances(vec![
            terminated_instance(),
            running_instance("1.2.3.4"),
            running_instance("1.2.3.4"),
        ]);
        let mut watchdog = watchdog(provider, MockNotifier::default());

        watchdog.tick().await.unwrap();
        watchdog.tick().await.unwrap();

        assert_eq!(watchdog.notifier.sent.lock().unwrap().len(), 1);
        assert_eq!(watchdog.provider.start_calls.load(Ordering::SeqCst), 1);
    }
}
