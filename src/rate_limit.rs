use std::{net::IpAddr, num::NonZeroU32, time::Duration};

use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use thiserror::Error;

const LOGIN_ATTEMPTS_PER_MINUTE: NonZeroU32 = match NonZeroU32::new(5) {
    Some(value) => value,
    None => unreachable!(),
};
const REGISTRATIONS_PER_MINUTE: NonZeroU32 = match NonZeroU32::new(5) {
    Some(value) => value,
    None => unreachable!(),
};

type KeyedLimiter<K> = RateLimiter<K, DashMapStateStore<K>, DefaultClock>;

/// Rate limiter shared for login attempts, keyed by client IP and by username.
pub struct LoginRateLimiter {
    ip_limiter: KeyedLimiter<IpAddr>,
    username_limiter: KeyedLimiter<String>,
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        Self::with_quota(Quota::per_minute(LOGIN_ATTEMPTS_PER_MINUTE))
    }

    fn with_quota(quota: Quota) -> Self {
        Self {
            ip_limiter: RateLimiter::keyed(quota),
            username_limiter: RateLimiter::keyed(quota),
        }
    }

    pub fn check_ip(&self, ip: IpAddr) -> Result<(), RateLimitError> {
        check_key(&self.ip_limiter, &ip).map_err(RateLimitError::Ip)
    }

    pub fn check_username(&self, username: &str) -> Result<(), RateLimitError> {
        check_key(&self.username_limiter, &username.to_owned()).map_err(RateLimitError::Username)
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Rate limiter for account creation per client IP.
pub struct RegistrationRateLimiter {
    limiter: KeyedLimiter<IpAddr>,
}

impl RegistrationRateLimiter {
    pub fn new() -> Self {
        Self {
            limiter: RateLimiter::keyed(Quota::per_minute(REGISTRATIONS_PER_MINUTE)),
        }
    }

    pub fn check_ip(&self, ip: IpAddr) -> Result<(), RateLimitError> {
        check_key(&self.limiter, &ip).map_err(RateLimitError::Registration)
    }
}

impl Default for RegistrationRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn check_key<K>(limiter: &KeyedLimiter<K>, key: &K) -> Result<(), Duration>
where
    K: Clone + std::hash::Hash + Eq,
{
    match limiter.check_key(key) {
        Ok(_) => {
            limiter.retain_recent();
            Ok(())
        }
        Err(not_until) => Err(not_until.wait_time_from(DefaultClock::default().now())),
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Too many attempts from this IP. Try again in {0:?}.")]
    Ip(Duration),
    #[error("Too many attempts for this username. Try again in {0:?}.")]
    Username(Duration),
    #[error("Too many registrations from this IP. Try again in {0:?}.")]
    Registration(Duration),
}

impl RateLimitError {
    pub fn retry_after(&self) -> Duration {
        match self {
            RateLimitError::Ip(duration)
            | RateLimitError::Username(duration)
            | RateLimitError::Registration(duration) => *duration,
        }
    }

    /// Message shown to the user on the redirected form.
    pub fn user_message(&self) -> &'static str {
        match self {
            RateLimitError::Ip(_) => {
                "Too many login attempts from this IP address. Please wait and try again."
            }
            RateLimitError::Username(_) => {
                "Too many login attempts for this username. Please wait before trying again."
            }
            RateLimitError::Registration(_) => {
                "Too many registration attempts from this IP. Please wait and try again."
            }
        }
    }
}
