use std::env;
use std::sync::{Mutex, PoisonError};

use atelier_contracts::error::{GatewayError, GatewayResult};

/// Host capability for locating and choosing an API key.
pub trait CredentialHost: Send + Sync {
    /// Key the host already has selected, if any.
    fn selected(&self) -> Option<String>;

    /// Asks the user to pick a key. `None` when the flow yields nothing or
    /// the host cannot prompt.
    fn prompt_selection(&self) -> Option<String>;
}

/// Reads `GEMINI_API_KEY`, then `GOOGLE_API_KEY`. Cannot prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialHost;

impl CredentialHost for EnvCredentialHost {
    fn selected(&self) -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn prompt_selection(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticCredentialHost {
    key: Option<String>,
}

impl StaticCredentialHost {
    pub fn new(key: Option<String>) -> Self {
        Self {
            key: key
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        }
    }
}

impl CredentialHost for StaticCredentialHost {
    fn selected(&self) -> Option<String> {
        self.key.clone()
    }

    fn prompt_selection(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CredentialState {
    Unknown,
    Active(String),
    /// The host's pre-selected key was rejected; only a fresh selection helps.
    Invalidated,
}

/// Credential cache shared by every gateway operation.
pub struct Credentials {
    host: Box<dyn CredentialHost>,
    state: Mutex<CredentialState>,
}

impl Credentials {
    pub fn new(host: impl CredentialHost + 'static) -> Self {
        Self {
            host: Box::new(host),
            state: Mutex::new(CredentialState::Unknown),
        }
    }

    pub fn from_env() -> Self {
        Self::new(EnvCredentialHost)
    }

    pub fn is_provisioned(&self) -> bool {
        matches!(*self.lock(), CredentialState::Active(_))
    }

    pub fn acquire(&self) -> GatewayResult<String> {
        let mut state = self.lock();
        let acquired = match &*state {
            CredentialState::Active(key) => return Ok(key.clone()),
            CredentialState::Unknown => self
                .host
                .selected()
                .or_else(|| self.host.prompt_selection()),
            CredentialState::Invalidated => self.host.prompt_selection(),
        };
        let key = acquired
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(GatewayError::CredentialUnavailable)?;
        *state = CredentialState::Active(key.clone());
        Ok(key)
    }

    pub fn invalidate(&self) {
        *self.lock() = CredentialState::Invalidated;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CredentialState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use atelier_contracts::error::GatewayError;

    use super::{CredentialHost, Credentials, StaticCredentialHost};

    #[derive(Clone, Default)]
    struct CountingHost {
        selected: Option<String>,
        prompted: Option<String>,
        prompts: Arc<AtomicUsize>,
    }

    impl CredentialHost for CountingHost {
        fn selected(&self) -> Option<String> {
            self.selected.clone()
        }

        fn prompt_selection(&self) -> Option<String> {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            self.prompted.clone()
        }
    }

    #[test]
    fn missing_credential_is_unavailable() {
        let credentials = Credentials::new(StaticCredentialHost::new(Some("  ".to_string())));
        assert_eq!(credentials.acquire(), Err(GatewayError::CredentialUnavailable));
        assert!(!credentials.is_provisioned());
    }

    #[test]
    fn selected_key_is_cached_without_prompting() {
        let host = CountingHost {
            selected: Some("k1".to_string()),
            ..CountingHost::default()
        };
        let prompts = host.prompts.clone();
        let credentials = Credentials::new(host);

        assert_eq!(credentials.acquire(), Ok("k1".to_string()));
        assert_eq!(credentials.acquire(), Ok("k1".to_string()));
        assert_eq!(prompts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn prompt_is_used_when_nothing_selected() {
        let host = CountingHost {
            prompted: Some("picked".to_string()),
            ..CountingHost::default()
        };
        let credentials = Credentials::new(host);
        assert_eq!(credentials.acquire(), Ok("picked".to_string()));
        assert!(credentials.is_provisioned());
    }

    #[test]
    fn invalidation_forces_a_fresh_selection() {
        let host = CountingHost {
            selected: Some("stale".to_string()),
            prompted: Some("fresh".to_string()),
            ..CountingHost::default()
        };
        let prompts = host.prompts.clone();
        let credentials = Credentials::new(host);

        assert_eq!(credentials.acquire(), Ok("stale".to_string()));
        credentials.invalidate();
        assert!(!credentials.is_provisioned());
        assert_eq!(credentials.acquire(), Ok("fresh".to_string()));
        assert_eq!(prompts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidated_without_prompt_is_unavailable() {
        let credentials = Credentials::new(StaticCredentialHost::new(Some("k".to_string())));
        credentials.acquire().unwrap();
        credentials.invalidate();
        assert_eq!(credentials.acquire(), Err(GatewayError::CredentialUnavailable));
    }
}
