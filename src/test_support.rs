//! Scripted and recording doubles shared by the unit tests

use crate::attach::{AttachError, AttachResult};
use crate::backend::{ConnectionInfo, VolumeDriver};
use crate::connector::{ConnectorFactory, Device, DeviceConnector, HostConnector};
use crate::executor::{
    CommandOutput, CommandRunner, ExecResult, ExecutionError, Executor, RetryPolicy, ShellCommand,
};
use crate::properties::{parse_location, ConnectionProperties, Protocol, TargetIdentifier};
use crate::volume::Volume;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Runner that replays queued results and records every command.
/// An empty queue answers with empty success.
#[derive(Default)]
pub struct ScriptedRunner {
    script: Mutex<VecDeque<ExecResult<CommandOutput>>>,
    commands: Mutex<Vec<ShellCommand>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_success(&self, stdout: &str) {
        self.script.lock().unwrap().push_back(Ok(CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
        }));
    }

    pub fn push_failure(&self, stderr: &str) {
        self.script.lock().unwrap().push_back(Err(ExecutionError::Failed {
            command: "scripted".to_string(),
            exit_code: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }));
    }

    pub fn push_timeout(&self) {
        self.script.lock().unwrap().push_back(Err(ExecutionError::TimedOut {
            command: "scripted".to_string(),
            timeout: Duration::from_secs(1),
        }));
    }

    pub fn push_spawn_failure(&self) {
        self.script.lock().unwrap().push_back(Err(ExecutionError::Spawn {
            command: "scripted".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }));
    }

    pub fn invocations(&self) -> usize {
        self.commands.lock().unwrap().len()
    }

    pub fn commands(&self) -> Vec<ShellCommand> {
        self.commands.lock().unwrap().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &ShellCommand) -> ExecResult<CommandOutput> {
        self.commands.lock().unwrap().push(command.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(CommandOutput::default()))
    }
}

/// Executor over a scripted runner with no backoff
pub fn executor_with(runner: &Arc<ScriptedRunner>) -> Executor {
    let policy = RetryPolicy {
        backoff_unit: Duration::ZERO,
        ..Default::default()
    };
    Executor::new(runner.clone(), policy)
}

/// Ordered log of attach/detach calls across driver and connector
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Where to inject a failure
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// Driver rejects the host connector
    pub host: bool,
    pub initialize: bool,
    pub terminate: bool,
    pub factory: bool,
    pub connect: bool,
    pub validate: bool,
    pub disconnect: bool,
}

/// Driver that resolves only the stored location and records calls
pub struct RecordingDriver {
    pub events: EventLog,
    pub faults: Faults,
}

impl VolumeDriver for RecordingDriver {
    fn validate_connector(&self, _host: &HostConnector) -> AttachResult<()> {
        if self.faults.host {
            return Err(AttachError::InvalidConnector("no initiator".to_string()));
        }
        Ok(())
    }

    fn initialize_connection(
        &self,
        volume: &Volume,
        _host: &HostConnector,
    ) -> AttachResult<ConnectionInfo> {
        self.events.lock().unwrap().push("initialize".to_string());
        if self.faults.initialize {
            return Err(AttachError::unsupported("initialize_connection"));
        }
        let location = volume
            .location()
            .unwrap_or("10.0.0.5:3260,1 iqn.example:target");
        let record = parse_location(location)?;
        Ok(ConnectionInfo {
            protocol: Protocol::Iscsi,
            data: ConnectionProperties {
                protocol: Protocol::Iscsi,
                target_discovered: false,
                target_address: record.address,
                target_identifier: TargetIdentifier::Single(record.identifier),
                logical_unit: record.lun.unwrap_or(0),
                volume_id: volume.id.clone(),
                auth: None,
                geometry: None,
            },
        })
    }

    fn terminate_connection(&self, _volume: &Volume, _host: &HostConnector) -> AttachResult<()> {
        self.events.lock().unwrap().push("terminate".to_string());
        if self.faults.terminate {
            return Err(AttachError::unsupported("terminate_connection"));
        }
        Ok(())
    }

    fn clear_download(&self, _volume: &Volume) -> AttachResult<()> {
        self.events.lock().unwrap().push("clear_download".to_string());
        Ok(())
    }
}

/// Factory whose connectors record calls into the shared log
pub struct RecordingFactory {
    pub events: EventLog,
    pub faults: Faults,
    pub device_path: PathBuf,
}

impl ConnectorFactory for RecordingFactory {
    fn connector(
        &self,
        protocol: Protocol,
        use_multipath: bool,
    ) -> AttachResult<Box<dyn DeviceConnector>> {
        self.events
            .lock()
            .unwrap()
            .push(format!("factory {} multipath={}", protocol, use_multipath));
        if self.faults.factory {
            return Err(AttachError::unsupported("connector"));
        }
        Ok(Box::new(RecordingConnector {
            events: self.events.clone(),
            faults: self.faults,
            device_path: self.device_path.clone(),
        }))
    }
}

pub struct RecordingConnector {
    events: EventLog,
    faults: Faults,
    device_path: PathBuf,
}

impl DeviceConnector for RecordingConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Iscsi
    }

    fn connect(&self, properties: &ConnectionProperties) -> AttachResult<Device> {
        self.events.lock().unwrap().push(format!(
            "connect {} {} {}",
            properties.target_address, properties.target_identifier, properties.logical_unit
        ));
        if self.faults.connect {
            return Err(AttachError::unsupported("connect"));
        }
        Ok(Device {
            path: self.device_path.clone(),
        })
    }

    fn disconnect(&self, _properties: &ConnectionProperties, _device: &Device) -> AttachResult<()> {
        self.events.lock().unwrap().push("disconnect".to_string());
        if self.faults.disconnect {
            return Err(AttachError::unsupported("disconnect"));
        }
        Ok(())
    }

    fn check_valid_device(&self, path: &Path) -> bool {
        self.events
            .lock()
            .unwrap()
            .push(format!("validate {}", path.display()));
        !self.faults.validate
    }
}

/// Driver and factory sharing one event log
pub fn recording_pair(
    faults: Faults,
    device_path: &Path) -> (RecordingDriver, RecordingFactory, EventLog,
) {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let driver = RecordingDriver {
        events: events.clone(),
        faults,
    };
    let factory = RecordingFactory {
        events: events.clone(),
        faults,
        device_path: device_path.to_path_buf(),
    };
    (driver, factory, events)
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn host() -> HostConnector {
    HostConnector {
        ip: "10.0.0.1".to_string(),
        host: "node-1".to_string(),
        initiator: Some("iqn.1993-08.org.debian:01:node-1".to_string()),
        multipath: false,
    }
}

pub fn volume_at(location: &str) -> Volume {
    Volume {
        id: "vol-0001".to_string(),
        name: "volume-0001".to_string(),
        host: "10.0.0.5".to_string(),
        size_gb: 1,
        provider_location: Some(location.to_string()),
        ..Default::default()
    }
}
