//! `OrEnvExt`: fills an `Option<T>` CLI arg from a fallback environment
//! variable when the flag wasn't passed on the command line.

use std::env;
use std::str::FromStr;

use anyhow::Context;

pub trait OrEnvExt: Sized {
    fn or_env_mut(&mut self, env_var: &'static str) -> anyhow::Result<&mut Self>;
}

fn env_var_opt(env_var: &'static str) -> anyhow::Result<Option<String>> {
    match env::var(env_var) {
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(s)) => {
            Err(anyhow::format_err!("invalid unicode: '{s:?}'"))
        }
    }
}

impl<T> OrEnvExt for Option<T>
where
    T: FromStr,
    T::Err: Into<anyhow::Error>,
{
    fn or_env_mut(&mut self, env_var: &'static str) -> anyhow::Result<&mut Option<T>> {
        if self.is_none() {
            let val_str = match env_var_opt(env_var).context(env_var)? {
                Some(v) => v,
                None => return Ok(self),
            };
            let val = T::from_str(&val_str)
                .map_err(Into::into)
                .with_context(|| format!("invalid env value `${env_var}`"))?;
            *self = Some(val);
        }
        Ok(self)
    }
}
