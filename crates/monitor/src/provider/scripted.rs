#![forbid(unsafe_code)]

use super::{EnumerationError, SnapshotProvider};
use crate::domain::{DeviceRecord, PortRecord};
use crate::snapshot::Snapshot;
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Attached {
        devices: Vec<DeviceRecord>,
        ports: Vec<PortRecord>,
    },
    Fail(String),
}

impl ScriptStep {
    pub fn devices(devices: impl IntoIterator<Item = DeviceRecord>) -> Self {
        Self::Attached {
            devices: devices.into_iter().collect(),
            ports: Vec::new(),
        }
    }

    pub fn attached(
        devices: impl IntoIterator<Item = DeviceRecord>,
        ports: impl IntoIterator<Item = PortRecord>,
    ) -> Self {
        Self::Attached {
            devices: devices.into_iter().collect(),
            ports: ports.into_iter().collect(),
        }
    }
}

/// Deterministic provider that plays back a queue of steps, one per
/// snapshot. Once the queue runs dry the last successful step repeats.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<ScriptStep>>,
    current: Mutex<(Vec<DeviceRecord>, Vec<PortRecord>)>,
}

impl ScriptedProvider {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            current: Mutex::default(),
        }
    }

    pub fn push(&self, step: ScriptStep) {
        self.steps.lock().push_back(step);
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().len()
    }
}

impl SnapshotProvider for ScriptedProvider {
    fn list_devices(&self) -> Result<Vec<DeviceRecord>, EnumerationError> {
        Ok(self.current.lock().0.clone())
    }

    fn list_ports(&self) -> Result<Vec<PortRecord>, EnumerationError> {
        Ok(self.current.lock().1.clone())
    }

    fn snapshot(&self) -> Result<Snapshot, EnumerationError> {
        let step = self.steps.lock().pop_front();
        let mut current = self.current.lock();
        match step {
            Some(ScriptStep::Fail(reason)) => return Err(EnumerationError::Scripted(reason)),
            Some(ScriptStep::Attached { devices, ports }) => *current = (devices, ports),
            None => {}
        }
        Ok(Snapshot::from_records(
            current.0.iter().cloned(),
            current.1.iter().cloned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plays_back_then_repeats() {
        let provider = ScriptedProvider::new([
            ScriptStep::devices([DeviceRecord::new(1, 1)]),
            ScriptStep::Fail("bus reset".into()),
        ]);

        assert_eq!(provider.snapshot().unwrap().devices.len(), 1);
        assert_eq!(
            provider.snapshot(),
            Err(EnumerationError::Scripted("bus reset".into()))
        );
        assert_eq!(provider.snapshot().unwrap().devices.len(), 1);
        assert_eq!(provider.list_devices().unwrap().len(), 1);
        assert_eq!(provider.remaining(), 0);
    }
}
