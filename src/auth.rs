use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Shared staff password checked at connection startup. A client that gets
/// past it is treated as an authenticated admin actor named by its user.
#[derive(Debug)]
pub struct AvaildAuthSource {
    password: String,
}

impl AvaildAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for AvaildAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
