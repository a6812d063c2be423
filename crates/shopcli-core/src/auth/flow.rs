use std::env;

/// Interactive flows that can produce a new identity token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlow {
    /// Authorization code + PKCE with a loopback redirect.
    Browser,
    /// Device authorization grant; the user enters a code on another device.
    Device,
}

impl AuthFlow {
    /// Pick a flow from environment variables and terminal capabilities.
    pub fn detect(cloud_environment: bool) -> Self {
        if let Some(flow) = env::var("SHOPCLI_AUTH_FLOW")
            .ok()
            .and_then(|value| value.parse::<AuthFlow>().ok())
        {
            return flow;
        }

        if env::var_os("SHOPCLI_DEVICE_AUTH").is_some() || cloud_environment {
            return AuthFlow::Device;
        }

        if browser_available() {
            AuthFlow::Browser
        } else {
            AuthFlow::Device
        }
    }
}

fn browser_available() -> bool {
    if env::var_os("SSH_CONNECTION").is_some() && env::var_os("DISPLAY").is_none() {
        return false;
    }

    if env::var_os("DISPLAY").is_some() || env::var_os("WAYLAND_DISPLAY").is_some() {
        return true;
    }

    cfg!(target_os = "windows") || cfg!(target_os = "macos")
}

impl std::str::FromStr for AuthFlow {
    type Err = InvalidFlow;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "browser" => Ok(AuthFlow::Browser),
            "device" | "device-code" => Ok(AuthFlow::Device),
            other => Err(InvalidFlow(other.to_owned())),
        }
    }
}

impl std::fmt::Display for AuthFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            AuthFlow::Browser => "browser",
            AuthFlow::Device => "device",
        };
        write!(f, "{value}")
    }
}

/// Error reported when parsing an unsupported flow.
#[derive(Debug, thiserror::Error)]
#[error("invalid auth flow '{0}'")]
pub struct InvalidFlow(pub String);
