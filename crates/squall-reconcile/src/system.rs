//! Host resource snapshot and scheduling availability.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use squall_state::{Application, SystemInfo};
use sysinfo::{Disks, System};

/// Raw host figures, before reservations and assignments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostSnapshot {
    pub cores: u32,
    pub cpu_usage: f64,
    pub total_memory: u64,
    pub free_memory: u64,
    pub total_disk: u64,
    pub free_disk: u64,
}

/// Fractions of the host held back from scheduling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reservation {
    pub cpu_fraction: f64,
    pub memory_fraction: f64,
}

impl Default for Reservation {
    fn default() -> Self {
        Self {
            cpu_fraction: 0.25,
            memory_fraction: 0.25,
        }
    }
}

#[async_trait]
pub trait SystemProbe: Send + Sync {
    async fn snapshot(&self) -> HostSnapshot;
}

/// Derive scheduling figures from a snapshot:
/// `allocatable = total × (1 − reserved)`,
/// `available = allocatable − Σ assigned`.
pub fn system_info(
    snapshot: &HostSnapshot,
    reservation: Reservation,
    assigned: &[Application],
) -> SystemInfo {
    let cpu_allocatable = f64::from(snapshot.cores) * (1.0 - reservation.cpu_fraction);
    let memory_allocatable =
        (snapshot.total_memory as f64 * (1.0 - reservation.memory_fraction)) as u64;
    let cpu_assigned: f64 = assigned.iter().map(|app| app.cpu).sum();
    let memory_assigned: u64 = assigned.iter().map(|app| app.memory).sum();

    SystemInfo {
        cores: snapshot.cores,
        cpu_usage: snapshot.cpu_usage,
        cpu_allocatable,
        cpu_available: (cpu_allocatable - cpu_assigned).max(0.0),
        total_memory: snapshot.total_memory,
        free_memory: snapshot.free_memory,
        memory_allocatable,
        memory_available: memory_allocatable.saturating_sub(memory_assigned),
        total_disk: snapshot.total_disk,
        free_disk: snapshot.free_disk,
    }
}

/// Reads the real host through `sysinfo`.
#[derive(Clone)]
pub struct HostProbe {
    system: Arc<Mutex<System>>,
}

impl HostProbe {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new_all())),
        }
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemProbe for HostProbe {
    async fn snapshot(&self) -> HostSnapshot {
        let system = self.system.clone();
        let joined = tokio::task::spawn_blocking(move || {
            // CPU usage is measured between consecutive refreshes of the
            // same `System`, so it is kept across ticks.
            let mut sys = system.lock().unwrap_or_else(PoisonError::into_inner);
            sys.refresh_all();

            let disks = Disks::new_with_refreshed_list();
            let (total_disk, free_disk) = disks.list().iter().fold((0u64, 0u64), |(t, f), d| {
                (t + d.total_space(), f + d.available_space())
            });

            HostSnapshot {
                cores: sys.cpus().len() as u32,
                cpu_usage: f64::from(sys.global_cpu_info().cpu_usage()),
                total_memory: sys.total_memory(),
                free_memory: sys.available_memory(),
                total_disk,
                free_disk,
            }
        })
        .await;
        joined.unwrap_or_default()
    }
}
