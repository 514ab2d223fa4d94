//! Sustained voices, bounded by count and age.

use bevy::log::debug;
use serde::Serialize;

use crate::config::DroneLimits;

pub type VoiceId = u64;

/// How a voice is silenced when it is stopped or evicted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DroneVoice {
    /// A held oscillator; stopping it emits `DroneStop`.
    Oscillator,
    /// A scheduled note pattern; stopping it cancels the task group.
    Pattern { group: String },
}

#[derive(Clone, Debug)]
pub struct Drone {
    pub id: VoiceId,
    pub born_at_ms: u64,
    pub kind: &'static str,
    pub voice: DroneVoice,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DroneStats {
    pub live: usize,
    pub created: u64,
    pub evicted_by_age: u64,
    pub evicted_by_count: u64,
}

pub struct DroneRegistry {
    live: Vec<Drone>,
    next_id: VoiceId,
    limits: DroneLimits,
    created: u64,
    evicted_by_age: u64,
    evicted_by_count: u64,
}

impl DroneRegistry {
    pub fn new(limits: DroneLimits) -> Self {
        Self {
            live: Vec::new(),
            next_id: 0,
            limits,
            created: 0,
            evicted_by_age: 0,
            evicted_by_count: 0,
        }
    }

    /// Append a voice and run a reap pass. Returns the id and every drone the
    /// pass evicted; the caller must release those.
    pub fn register(
        &mut self,
        now_ms: u64,
        kind: &'static str,
        voice: DroneVoice,
    ) -> (VoiceId, Vec<Drone>) {
        self.next_id += 1;
        self.created += 1;
        self.live.push(Drone {
            id: self.next_id,
            born_at_ms: now_ms,
            kind,
            voice,
        });
        (self.next_id, self.reap(now_ms))
    }

    /// Evict drones older than the age limit, then the oldest beyond the count limit.
    pub fn reap(&mut self, now_ms: u64) -> Vec<Drone> {
        let max_age = self.limits.max_age_ms;
        let (expired, alive): (Vec<Drone>, Vec<Drone>) = std::mem::take(&mut self.live)
            .into_iter()
            .partition(|drone| now_ms.saturating_sub(drone.born_at_ms) > max_age);
        self.live = alive;
        self.evicted_by_age += expired.len() as u64;

        let mut evicted = expired;
        let max = self.limits.max_concurrent.max(1);
        if self.live.len() > max {
            let excess = self.live.len() - max;
            self.evicted_by_count += excess as u64;
            evicted.extend(self.live.drain(0..excess));
        }
        if !evicted.is_empty() {
            debug!(
                "[Ritual drones] Reaped {} voice(s), {} still live",
                evicted.len(),
                self.live.len()
            );
        }
        evicted
    }

    /// Remove one voice; `None` if it was already stopped.
    pub fn remove(&mut self, id: VoiceId) -> Option<Drone> {
        let idx = self.live.iter().position(|drone| drone.id == id)?;
        Some(self.live.remove(idx))
    }

    pub fn drain_all(&mut self) -> Vec<Drone> {
        std::mem::take(&mut self.live)
    }

    pub fn contains(&self, id: VoiceId) -> bool {
        self.live.iter().any(|drone| drone.id == id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn ids(&self) -> Vec<VoiceId> {
        self.live.iter().map(|drone| drone.id).collect()
    }

    pub fn oldest_age(&self, now_ms: u64) -> Option<u64> {
        self.live
            .iter()
            .map(|drone| now_ms.saturating_sub(drone.born_at_ms))
            .max()
    }

    pub fn stats(&self) -> DroneStats {
        DroneStats {
            live: self.live.len(),
            created: self.created,
            evicted_by_age: self.evicted_by_age,
            evicted_by_count: self.evicted_by_count,
        }
    }
}
