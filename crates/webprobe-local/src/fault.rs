use crate::config::{FaultConfig, FAULT_MESSAGE_SEED, FAULT_TRIGGER_SEED};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Simulated fetch failures.
///
/// Two independent seeded streams: one decides whether a fetch fails, the other renders the
/// message. Neither is shared with perturbation.
#[derive(Debug)]
pub struct FaultInjector {
    cfg: FaultConfig,
    trigger: Mutex<StdRng>,
    message: Mutex<StdRng>,
}

const TEMPLATE_COUNT: usize = 6;

impl FaultInjector {
    pub fn new(cfg: FaultConfig) -> Self {
        Self {
            cfg,
            trigger: Mutex::new(StdRng::seed_from_u64(FAULT_TRIGGER_SEED)),
            message: Mutex::new(StdRng::seed_from_u64(FAULT_MESSAGE_SEED)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(FaultConfig::default())
    }

    pub fn from_env() -> Self {
        Self::new(FaultConfig::from_env())
    }

    pub fn is_enabled(&self) -> bool {
        self.cfg.enabled
    }

    /// Returns a fake error message when this fetch should fail.
    pub fn maybe_fail(&self, url: &str) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        let hit = {
            let mut rng = self.trigger.lock().unwrap_or_else(|e| e.into_inner());
            rng.gen::<f64>() < self.cfg.rate
        };
        hit.then(|| self.fake_error_message(url))
    }

    fn fake_error_message(&self, url: &str) -> String {
        let (host, path) = match url::Url::parse(url) {
            Ok(u) => (
                u.host_str().unwrap_or("unknown").to_string(),
                match u.path() {
                    "" => "/".to_string(),
                    p => p.to_string(),
                },
            ),
            Err(_) => ("unknown".to_string(), "/".to_string()),
        };
        let mut rng = self.message.lock().unwrap_or_else(|e| e.into_inner());
        let id1: u64 = rng.gen_range(0x1000_0000..0xFFFF_FFFF);
        let id2: u64 = rng.gen_range(0x1000_0000..0xFFFF_FFFF);
        match rng.gen_range(0..TEMPLATE_COUNT) {
            0 => format!("503 Server Error: Service Unavailable for url: {url}"),
            1 => format!("429 Client Error: Too Many Requests for url: {url}"),
            2 => format!("403 Client Error: Forbidden for url: {url}"),
            3 => format!(
                "HTTPSConnectionPool(host='{host}', port=443): Max retries exceeded with url: {path} \
                 (Caused by ConnectTimeoutError(<urllib3.connection.HTTPSConnection object at 0x{id1:x}>, \
                 'Connection to {host} timed out. (connect timeout=5)'))"
            ),
            4 => format!(
                "HTTPSConnectionPool(host='{host}', port=443): Read timed out. (read timeout=5)"
            ),
            _ => format!(
                "Max retries exceeded with url: {path} \
                 (Caused by NewConnectionError('<urllib3.connection.HTTPSConnection object at 0x{id2:x}>: \
                 Failed to establish a new connection: [Errno -2] Name or service not known'))"
            ),
        }
    }
}
