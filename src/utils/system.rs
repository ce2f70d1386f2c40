// src/utils/system.rs: System functions

use sysinfo::{CpuRefreshKind, RefreshKind, System};


/// Determines number of cores the wrapped tools may be told to use.
///
/// # Returns
///
/// usize physical cores, falling back to logical CPUs, never less than 1.
pub fn detect_cores() -> usize {
    if let Some(physical_cores) = System::physical_core_count() {
        return physical_cores.max(1);
    }
    let refresh_kind = RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing());
    let system = System::new_with_specifics(refresh_kind);
    system.cpus().len().max(1)
}


/// Clamps a requested per-tool thread count to what the host can provide.
///
/// # Arguments
///
/// * `requested` - Thread count from the command line.
/// * `max_cores` - Result of detect_cores.
///
/// # Returns
///
/// usize in 1..=max_cores
pub fn tool_threads(requested: usize, max_cores: usize) -> usize {
    requested.clamp(1, max_cores.max(1))
}
