use anyhow::{anyhow, Result};

pub const PASSPHRASE_ENV: &str = "DNP_PASSPHRASE";
pub const NEW_PASSPHRASE_ENV: &str = "DNP_NEW_PASSPHRASE";
pub const PASSPHRASE_CONFIRM_ENV: &str = "DNP_PASSPHRASE_CONFIRM";
pub const PHRASE_ENV: &str = "DNP_RECOVERY_PHRASE";

fn from_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

pub fn passphrase(prompt: &str) -> Result<String> {
    if let Some(pw) = from_env(PASSPHRASE_ENV) {
        return Ok(pw);
    }
    rpassword::prompt_password(prompt).map_err(|e| anyhow!("passphrase prompt: {e}"))
}

/// Ask twice. When `env` is set, `DNP_PASSPHRASE_CONFIRM` (if set) must match it.
pub fn new_passphrase(prompt: &str, env: &str) -> Result<String> {
    if let Some(pw) = from_env(env) {
        if let Some(confirm) = from_env(PASSPHRASE_CONFIRM_ENV) {
            if confirm != pw {
                return Err(anyhow!("passphrase confirmation mismatch"));
            }
        }
        return Ok(pw);
    }
    let first = rpassword::prompt_password(prompt).map_err(|e| anyhow!("passphrase prompt: {e}"))?;
    let second = rpassword::prompt_password("Confirm passphrase: ")
        .map_err(|e| anyhow!("passphrase prompt: {e}"))?;
    if first != second {
        return Err(anyhow!("passphrases do not match"));
    }
    Ok(first)
}

pub fn recovery_phrase() -> Result<String> {
    if let Some(phrase) = from_env(PHRASE_ENV) {
        return Ok(phrase);
    }
    rpassword::prompt_password("Recovery phrase (12 words): ")
        .map_err(|e| anyhow!("phrase prompt: {e}"))
}
