//! Login exchange run while the connection is authenticating.

use md5::{Digest, Md5};
use pbxlink_config::{AuthMethod, Credentials};
use tracing::info;

use super::{MANAGER_TARGET, ManagerError, ManagerHandle};
use crate::action::{Action, ActionOutcome, ActionResponse};

/// Logs in with `credentials`, using the challenge exchange when configured.
pub(super) fn authenticate(
    manager: &ManagerHandle,
    credentials: &Credentials,
) -> Result<(), ManagerError> {
    let login = Action::new("Login").header("Username", credentials.username.as_str());
    let login = match credentials.method {
        AuthMethod::Plain => login.header("Secret", credentials.secret.as_str()),
        AuthMethod::Challenge => {
            let challenge = request_challenge(manager)?;
            login
                .header("AuthType", "md5")
                .header("Key", challenge_key(&challenge, &credentials.secret))
        }
    };
    let login = if credentials.events {
        login
    } else {
        login.header("Events", "off")
    };
    accepted(manager.send_action(login)?, "Login")?;
    info!(
        target: MANAGER_TARGET,
        username = credentials.username.as_str(),
        method = %credentials.method,
        "authenticated"
    );
    Ok(())
}

fn request_challenge(manager: &ManagerHandle) -> Result<String, ManagerError> {
    let response = accepted(
        manager.send_action(Action::new("Challenge").header("AuthType", "md5"))?,
        "Challenge",
    )?;
    response
        .message()
        .get("Challenge")
        .map(str::to_owned)
        .ok_or_else(|| ManagerError::Authentication {
            message: String::from("challenge response carried no challenge"),
        })
}

fn accepted(outcome: ActionOutcome, step: &str) -> Result<ActionResponse, ManagerError> {
    match outcome {
        ActionOutcome::Responded(response) if response.is_success() => Ok(response),
        ActionOutcome::Responded(response) => Err(ManagerError::Authentication {
            message: response
                .message()
                .get("Message")
                .unwrap_or("login rejected")
                .to_owned(),
        }),
        ActionOutcome::TimedOut { .. } => Err(ManagerError::Authentication {
            message: format!("{step} received no response"),
        }),
    }
}

/// Hex MD5 digest of the challenge followed by the secret.
pub(crate) fn challenge_key(challenge: &str, secret: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(challenge.as_bytes());
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}
