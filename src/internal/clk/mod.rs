/// Programmable interval timer, the uptime tick
pub mod pit;

/// Seconds since the PIT was started
pub fn time_since_boot() -> f64 {
    pit::uptime()
}
