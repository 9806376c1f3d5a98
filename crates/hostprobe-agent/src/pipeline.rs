//! One running generation of the agent: collectors, channel and batch loop,
//! all bound to a single cancellation handle.

use crate::config::{AgentConfig, ApiConfig, CollectorsConfig, SenderKind};
use crate::remote::YamlConfigSink;
use anyhow::{Context as _, Result};
use hostprobe_collector::cpu::CpuCollector;
use hostprobe_collector::disk::DiskCollector;
use hostprobe_collector::login::LoginFailureCollector;
use hostprobe_collector::memory::MemoryCollector;
use hostprobe_collector::port::PortCollector;
use hostprobe_collector::scheduler::spawn_collector;
use hostprobe_collector::service::ServiceCollector;
use hostprobe_collector::system_info::SystemInfoCollector;
use hostprobe_collector::users::UserActivityCollector;
use hostprobe_collector::Collector;
use hostprobe_common::context::{CancelHandle, Context};
use hostprobe_sender::batcher::Batcher;
use hostprobe_sender::client::{ApiSettings, DeliveryClient};
use hostprobe_sender::file::FileSender;
use hostprobe_sender::payload::MachineIdentity;
use hostprobe_sender::restart::RestartSignal;
use hostprobe_sender::{SendError, Sender};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub struct Pipeline {
    cancel: CancelHandle,
    collectors: Vec<JoinHandle<()>>,
    batcher: Option<JoinHandle<Result<(), SendError>>>,
    shutdown_timeout: Duration,
}

/// Enabled collectors with their poll intervals.
pub fn build_collectors(config: &CollectorsConfig) -> Vec<(Box<dyn Collector>, Duration)> {
    let mut collectors: Vec<(Box<dyn Collector>, Duration)> = Vec::new();
    if config.cpu.enabled {
        collectors.push((Box::new(CpuCollector::new()), config.cpu.interval()));
    }
    if config.ram.enabled {
        collectors.push((Box::new(MemoryCollector::new()), config.ram.interval()));
    }
    if config.disk.enabled {
        collectors.push((Box::new(DiskCollector::new()), config.disk.interval()));
    }
    let service = &config.service;
    if service.schedule.enabled {
        let collector = ServiceCollector::new(service.services.clone());
        collectors.push((Box::new(collector), service.schedule.interval()));
    }
    if config.user_activity.enabled {
        collectors.push((Box::new(UserActivityCollector::new()), config.user_activity.interval()));
    }
    let login = &config.login_failures;
    if login.schedule.enabled {
        let collector = LoginFailureCollector::new(login.auth_log.clone());
        collectors.push((Box::new(collector), login.schedule.interval()));
    }
    if config.port.enabled {
        collectors.push((Box::new(PortCollector::new()), config.port.interval()));
    }
    if config.system_info.enabled {
        collectors.push((Box::new(SystemInfoCollector::new()), config.system_info.interval()));
    }
    collectors
}

/// `server_id` when configured, the host name otherwise.
pub fn machine_identity(api: &ApiConfig) -> MachineIdentity {
    let machine_name = api
        .server_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .or_else(System::host_name)
        .unwrap_or_else(|| "unknown".to_string());
    let boot_time = Some(System::boot_time()).filter(|t| *t > 0);
    MachineIdentity {
        machine_name,
        boot_time,
    }
}

/// The configured sender, plus the interval feed when it can change remotely.
pub fn build_sender(
    config: &AgentConfig,
    config_path: &Path,
    restart: RestartSignal,
) -> Result<(Arc<dyn Sender>, Option<watch::Receiver<Duration>>)> {
    match config.sender {
        SenderKind::Api => {
            let api = config
                .api
                .as_ref()
                .context("sender 'api' requires an 'api' section")?;
            let settings = ApiSettings {
                base_url: api.base_url.clone(),
                project_id: api.project_id.clone(),
                token: api.token.clone(),
                encryption_key: api.encryption_key.clone(),
                timeout: api.timeout(),
                send_interval: config.send_interval(),
                config_last_update: config.config_last_update,
            };
            let client = DeliveryClient::new(settings, machine_identity(api))?
                .with_config_sink(Arc::new(YamlConfigSink::new(config_path)))
                .with_restart_signal(restart);
            tracing::info!(
                endpoint = client.endpoint(),
                encrypted = client.encryption_enabled(),
                "Delivering to API"
            );
            let updates = client.send_interval();
            Ok((Arc::new(client), Some(updates)))
        }
        SenderKind::LogFile => {
            let path = config
                .log_file
                .as_ref()
                .map(|f| f.path.clone())
                .context("sender 'log_file' requires 'log_file.path'")?;
            tracing::info!(path = %path.display(), "Writing batches to file");
            Ok((Arc::new(FileSender::new(path)), None))
        }
    }
}

impl Pipeline {
    pub fn start(config: &AgentConfig, config_path: &Path, restart: RestartSignal) -> Result<Self> {
        let (sender, interval_updates) = build_sender(config, config_path, restart)?;
        Ok(Self::spawn(
            build_collectors(&config.collectors),
            sender,
            interval_updates,
            config,
        ))
    }

    fn spawn(
        collectors: Vec<(Box<dyn Collector>, Duration)>,
        sender: Arc<dyn Sender>,
        interval_updates: Option<watch::Receiver<Duration>>,
        config: &AgentConfig,
    ) -> Self {
        let (ctx, cancel) = Context::with_cancel();
        let (tx, rx) = mpsc::channel(config.channel_capacity);

        let collectors = collectors
            .into_iter()
            .map(|(collector, every)| spawn_collector(collector, every, tx.clone(), ctx.clone()))
            .collect::<Vec<_>>();
        drop(tx);

        let mut batcher = Batcher::new(sender, config.send_interval());
        if let Some(updates) = interval_updates {
            batcher = batcher.with_interval_updates(updates);
        }
        let batcher = tokio::spawn(batcher.run(rx, ctx));

        tracing::info!(collectors = collectors.len(), "Pipeline started");
        Self {
            cancel,
            collectors,
            batcher: Some(batcher),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }

    /// Resolves when the batch loop stops on its own. Never resolves again
    /// afterwards.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(handle) = self.batcher.as_mut() else {
            return std::future::pending().await;
        };
        let outcome = handle.await;
        self.batcher = None;
        outcome.context("batch loop panicked")??;
        Ok(())
    }

    /// Cancels every task, waits up to the shutdown timeout for the final
    /// flush, then aborts whatever is still running.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel.cancel();
        let mut collectors = std::mem::take(&mut self.collectors);
        let mut batcher = self.batcher.take();

        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            for handle in collectors.iter_mut() {
                let _ = handle.await;
            }
            match batcher.as_mut() {
                Some(handle) => Some(handle.await),
                None => None,
            }
        })
        .await;

        match drained {
            Ok(Some(outcome)) => {
                outcome.context("batch loop panicked")??;
                tracing::info!("Pipeline stopped");
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "Shutdown timed out, aborting remaining tasks"
                );
                for handle in &collectors {
                    handle.abort();
                }
                if let Some(handle) = &batcher {
                    handle.abort();
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Schedule;
    use async_trait::async_trait;
    use hostprobe_common::types::{MetricName, Sample};
    use std::sync::Mutex;

    fn config(yaml: &str) -> AgentConfig {
        AgentConfig::from_yaml(yaml).unwrap()
    }

    const LOG_FILE: &str = "sender: log_file\nlog_file:\n  path: /tmp/hostprobe-test.jsonl\n";

    struct Counter(u64);

    fn counter(every: Duration) -> Vec<(Box<dyn Collector>, Duration)> {
        let collector: Box<dyn Collector> = Box::new(Counter(0));
        vec![(collector, every)]
    }

    impl Collector for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn collect(&mut self) -> anyhow::Result<Vec<Sample>> {
            self.0 += 1;
            Ok(vec![Sample::system(MetricName::Cpu, self.0)])
        }
    }

    #[derive(Default)]
    struct Recording {
        batches: Mutex<Vec<Vec<Sample>>>,
    }

    #[async_trait]
    impl Sender for Recording {
        async fn send_with_context(&self, _ctx: &Context, batch: &[Sample]) -> hostprobe_sender::Result<()> {
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }

        fn kind(&self) -> &str {
            "recording"
        }
    }

    struct Stuck;

    #[async_trait]
    impl Sender for Stuck {
        async fn send_with_context(&self, _ctx: &Context, _batch: &[Sample]) -> hostprobe_sender::Result<()> {
            std::future::pending().await
        }

        fn kind(&self) -> &str {
            "stuck"
        }
    }

    struct Rejected;

    #[async_trait]
    impl Sender for Rejected {
        async fn send_with_context(&self, _ctx: &Context, _batch: &[Sample]) -> hostprobe_sender::Result<()> {
            Err(SendError::Unauthorized)
        }

        fn kind(&self) -> &str {
            "rejected"
        }
    }

    #[test]
    fn default_collectors_are_built() {
        let collectors = build_collectors(&CollectorsConfig::default());
        let names: Vec<&str> = collectors.iter().map(|(c, _)| c.name()).collect();
        assert_eq!(names, vec!["cpu", "ram", "disk", "system_info"]);
        assert_eq!(collectors[0].1, Duration::from_secs(10));
        assert_eq!(collectors[3].1, Duration::from_secs(3600));
    }

    #[test]
    fn enabled_optional_collectors_are_built() {
        let mut cfg = CollectorsConfig::default();
        cfg.port = Schedule {
            enabled: true,
            interval_secs: 5,
        };
        cfg.service.schedule.enabled = true;
        cfg.service.services = vec!["sshd".to_string()];
        let names: Vec<String> = build_collectors(&cfg)
            .iter()
            .map(|(c, _)| c.name().to_string())
            .collect();
        assert!(names.contains(&"port".to_string()));
        assert!(names.contains(&"service".to_string()));
    }

    #[test]
    fn server_id_overrides_host_name() {
        let api = ApiConfig {
            base_url: "http://localhost".to_string(),
            project_id: "acme".to_string(),
            server_id: Some("web-01".to_string()),
            token: "t".to_string(),
            encryption_key: None,
            timeout_secs: 5,
        };
        assert_eq!(machine_identity(&api).machine_name, "web-01");
    }

    #[tokio::test]
    async fn log_file_sender_has_no_interval_feed() {
        let cfg = config(LOG_FILE);
        let (signal, _rx) = hostprobe_sender::restart::restart_channel();
        let (sender, updates) = build_sender(&cfg, Path::new("config.yaml"), signal).unwrap();
        assert_eq!(sender.kind(), "log_file");
        assert!(updates.is_none());
    }

    #[tokio::test]
    async fn api_sender_follows_remote_interval() {
        let cfg = config(
            "api:\n  base_url: http://127.0.0.1:9\n  project_id: acme\n  token: t\n  server_id: web-01\n",
        );
        let (signal, _rx) = hostprobe_sender::restart::restart_channel();
        let (sender, updates) = build_sender(&cfg, Path::new("config.yaml"), signal).unwrap();
        assert_eq!(sender.kind(), "api");
        assert_eq!(*updates.unwrap().borrow(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_collected_samples() {
        let mut cfg = config(LOG_FILE);
        cfg.send_interval_secs = 600;
        let sender = Arc::new(Recording::default());
        let pipeline = Pipeline::spawn(counter(Duration::from_secs(1)), sender.clone(), None, &cfg);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        pipeline.shutdown().await.unwrap();

        let batches = sender.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        let values: Vec<u64> = batches[0].iter().map(|s| s.value.as_u64().unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_sender_is_aborted_after_timeout() {
        let mut cfg = config(LOG_FILE);
        cfg.shutdown_timeout_secs = 2;
        let pipeline = Pipeline::spawn(counter(Duration::from_secs(1)), Arc::new(Stuck), None, &cfg);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = tokio::time::Instant::now();
        pipeline.shutdown().await.unwrap();
        assert!(started.elapsed() <= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_send_error_ends_wait() {
        let mut cfg = config(LOG_FILE);
        cfg.send_interval_secs = 1;
        let mut pipeline = Pipeline::spawn(counter(Duration::from_millis(200)), Arc::new(Rejected), None, &cfg);

        let err = pipeline.wait().await.unwrap_err();
        let send_err = err.downcast_ref::<SendError>().unwrap();
        assert!(send_err.is_fatal());
        pipeline.shutdown().await.unwrap();
    }
}
