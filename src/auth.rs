use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{PgWireError, PgWireResult};

use crate::observability::AUTH_FAILURES_TOTAL;

/// Single shared account for every hotel database.
#[derive(Debug)]
pub struct InnkeepAuthSource {
    user: String,
    password: String,
}

impl InnkeepAuthSource {
    pub fn new(user: String, password: String) -> Self {
        Self { user, password }
    }
}

#[async_trait]
impl AuthSource for InnkeepAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().unwrap_or_default();
        if user != self.user {
            metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
            tracing::warn!("login rejected for unknown user {user:?}");
            return Err(PgWireError::InvalidPassword(user.to_string()));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
