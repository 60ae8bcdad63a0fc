//! The reconciliation state machine.
//!
//! The cloud thermostat treats its target field as its own source of truth
//! and never says who changed it. The reconciler keeps a per-device
//! `cloud_reference` (the value it last pushed or adopted) and reads any poll
//! that disagrees with it as an edit made elsewhere.
//!
//! Nudges always land `margin` away from the translated local target, on the
//! side that makes the cloud agree with the locally computed demand.

use crate::device::DeviceRecord;

/// A cloud write the reconciler wants made
#[derive(Debug, Clone, PartialEq)]
pub struct Nudge {
    pub cloud_id: u64,
    pub value: f64,
    /// Reference before this nudge was issued, restored if the write fails
    pub previous_reference: Option<f64>,
}

/// Result of storing an ambient reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadingUpdate {
    /// The reading differs from the previous one; a pass is due
    pub changed: bool,
    /// This was the first reading and the cloud value was known
    pub bootstrapped: bool,
}

/// Result of feeding a cloud poll value into a record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollOutcome {
    /// First reference established from this poll
    Bootstrapped,
    /// No reference and no reading yet; bootstrap waits for the first reading
    AwaitingReading,
    /// Cloud still holds the value we expect
    Unchanged,
    /// Somebody else changed the cloud target; it has been adopted locally
    ExternalEdit { previous: f64 },
}

/// Per-device outcome of a reconciliation pass
#[derive(Debug, Clone, PartialEq)]
pub struct Demand {
    pub calling_for_heat: bool,
    pub nudge: Option<Nudge>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciler {
    margin: f64,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self { margin: 1.0 }
    }
}

impl Reconciler {
    pub fn new(margin: f64) -> Self {
        Self { margin }
    }

    /// Demand is a pure function of reading and target. A missing reading
    /// counts as `+inf` and a missing target never calls.
    pub fn calling_for_heat(record: &DeviceRecord) -> bool {
        match record.local_target {
            Some(target) => record.ambient.unwrap_or(f64::INFINITY) < target,
            None => false,
        }
    }

    /// Store a new ambient reading.
    ///
    /// The first reading after startup bootstraps the reference from the last
    /// polled cloud value and, when no target was set yet, infers one from
    /// which side of the cloud value the room sits. Without a polled value
    /// the bootstrap waits for [`Reconciler::on_cloud_poll`].
    pub fn on_ambient_reading(&self, record: &mut DeviceRecord, reading: f64) -> ReadingUpdate {
        let previous = record.ambient.replace(reading);
        let changed = previous != Some(reading);

        let bootstrapped = match (previous, record.cloud_target) {
            (None, Some(cloud)) => {
                self.bootstrap(record, reading, cloud);
                true
            }
            _ => false,
        };

        ReadingUpdate {
            changed,
            bootstrapped,
        }
    }

    /// Apply a locally commanded target.
    ///
    /// With a reading available the cloud is steered straight away and the
    /// reference moves to the pushed value before the write happens, so the
    /// next poll does not read our own write as an external edit.
    pub fn on_local_target_set(&self, record: &mut DeviceRecord, target: f64) -> Option<Nudge> {
        record.local_target = Some(target);
        let reading = record.ambient?;

        let base = record.to_cloud(target);
        let value = if reading > target {
            base - self.margin
        } else {
            base + self.margin
        };

        Some(Self::issue(record, value))
    }

    /// Feed one polled cloud value into a record
    pub fn on_cloud_poll(&self, record: &mut DeviceRecord, cloud_value: f64) -> PollOutcome {
        record.cloud_target = Some(cloud_value);

        match record.cloud_reference {
            None => match record.ambient {
                Some(reading) => {
                    self.bootstrap(record, reading, cloud_value);
                    PollOutcome::Bootstrapped
                }
                None => PollOutcome::AwaitingReading,
            },
            Some(reference) if reference == cloud_value => PollOutcome::Unchanged,
            Some(reference) => {
                record.cloud_reference = Some(cloud_value);
                record.local_target = Some(record.from_cloud(cloud_value));
                PollOutcome::ExternalEdit {
                    previous: reference,
                }
            }
        }
    }

    /// Recompute demand and the cloud value that matches it.
    ///
    /// A nudge is produced only when the steered value differs from the
    /// reference, and issuing it moves the reference, so repeating the call
    /// with the same inputs yields nothing.
    pub fn recompute_demand(&self, record: &mut DeviceRecord) -> Demand {
        let calling_for_heat = Self::calling_for_heat(record);

        let nudge = match (record.ambient, record.local_target) {
            (Some(_), Some(target)) => {
                let base = record.to_cloud(target);
                let value = if calling_for_heat {
                    base + self.margin
                } else {
                    base - self.margin
                };
                (record.cloud_reference != Some(value)).then(|| Self::issue(record, value))
            }
            _ => None,
        };

        Demand {
            calling_for_heat,
            nudge,
        }
    }

    /// Undo the reference move of a nudge whose cloud write failed.
    ///
    /// Left alone if another writer has moved the reference since.
    pub fn revert_nudge(&self, record: &mut DeviceRecord, nudge: &Nudge) {
        if record.cloud_reference == Some(nudge.value) {
            record.cloud_reference = nudge.previous_reference;
        }
    }

    fn bootstrap(&self, record: &mut DeviceRecord, reading: f64, cloud: f64) {
        record.cloud_reference = Some(cloud);
        if record.local_target.is_none() {
            let steered = if reading > cloud {
                cloud + self.margin
            } else {
                cloud - self.margin
            };
            record.local_target = Some(record.from_cloud(steered));
        }
    }

    fn issue(record: &mut DeviceRecord, value: f64) -> Nudge {
        let previous_reference = record.cloud_reference.replace(value);
        Nudge {
            cloud_id: record.cloud_id(),
            value,
            previous_reference,
        }
    }
}
