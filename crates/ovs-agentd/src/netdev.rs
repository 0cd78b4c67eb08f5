//! Kernel tap device management
//!
//! Devices are driven through iproute2. State is never cached: every
//! operation looks the device up by name first.

use async_trait::async_trait;
use ovs_agent_common::{shell, AgentError, AgentResult};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

/// Longest interface name the kernel accepts (IFNAMSIZ - 1)
pub const MAX_IFACE_NAME_LEN: usize = 15;

/// Maps a logical port name to a kernel device name.
///
/// Underscores become dashes and the result is cut to
/// [`MAX_IFACE_NAME_LEN`] bytes on a character boundary.
pub fn sanitize_iface_name(logical_port: &str) -> String {
    let mut name = String::with_capacity(MAX_IFACE_NAME_LEN);
    for c in logical_port.chars().map(|c| if c == '_' { '-' } else { c }) {
        if name.len() + c.len_utf8() > MAX_IFACE_NAME_LEN {
            break;
        }
        name.push(c);
    }
    name
}

/// Kernel device operations needed to realize a binding.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceManager: Send + Sync {
    /// Creates tap `name` or, if it already exists as a tap, reconciles its
    /// MTU. Fails if `name` exists with another link kind. Returns the
    /// device name.
    async fn create_tap(&self, name: &str, mtu: u32, vnet_hdr: bool) -> AgentResult<String>;

    /// Deletes `name`. A missing device is not an error.
    async fn delete_link(&self, name: &str) -> AgentResult<()>;

    /// Brings tap `name` up and returns its name.
    async fn set_link_up(&self, name: &str) -> AgentResult<String>;

    /// Brings `name` down. A missing device is reported as a not-found link.
    async fn set_link_down(&self, name: &str) -> AgentResult<()>;
}

/// Observed state of a kernel link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkState {
    pub name: String,
    /// "tap", "tun", another `info_kind`, or empty for plain devices
    pub kind: String,
    pub mtu: u32,
    pub admin_up: bool,
}

impl LinkState {
    pub fn is_tap(&self) -> bool {
        self.kind == "tap"
    }
}

#[derive(Debug, Deserialize)]
struct IpLinkJson {
    ifname: String,
    mtu: u32,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    linkinfo: Option<IpLinkInfoJson>,
}

#[derive(Debug, Deserialize)]
struct IpLinkInfoJson {
    #[serde(default)]
    info_kind: Option<String>,
    #[serde(default)]
    info_data: Option<Value>,
}

/// Parses the output of `ip -d -j link show dev NAME`.
pub fn parse_link_json(output: &str) -> AgentResult<LinkState> {
    let links: Vec<IpLinkJson> = serde_json::from_str(output)
        .map_err(|e| AgentError::device("?", format!("unparsable ip output: {e}")))?;
    let link = links
        .into_iter()
        .next()
        .ok_or_else(|| AgentError::device("?", "ip returned no link"))?;

    let kind = match link.linkinfo {
        Some(IpLinkInfoJson {
            info_kind: Some(kind),
            info_data,
        }) if kind == "tun" => info_data
            .as_ref()
            .and_then(|d| d.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("tun")
            .to_string(),
        Some(IpLinkInfoJson {
            info_kind: Some(kind),
            ..
        }) => kind,
        _ => String::new(),
    };

    Ok(LinkState {
        admin_up: link.flags.iter().any(|f| f == "UP"),
        name: link.ifname,
        kind,
        mtu: link.mtu,
    })
}

// Command builders

/// `ip -d -j link show` for one device
pub fn build_show_link_cmd(ip: &str, name: &str) -> String {
    format!("{} -d -j link show dev {}", ip, shell::shellquote(name))
}

/// Creates a tap without packet info, optionally with vnet headers
pub fn build_add_tap_cmd(ip: &str, name: &str, vnet_hdr: bool) -> String {
    let mut cmd = format!("{} tuntap add dev {} mode tap", ip, shell::shellquote(name));
    if vnet_hdr {
        cmd.push_str(" vnet_hdr");
    }
    cmd
}

/// Sets the MTU of a device
pub fn build_set_mtu_cmd(ip: &str, name: &str, mtu: u32) -> String {
    format!("{} link set dev {} mtu {}", ip, shell::shellquote(name), mtu)
}

/// Sets a device administratively up or down
pub fn build_set_link_state_cmd(ip: &str, name: &str, up: bool) -> String {
    format!(
        "{} link set dev {} {}",
        ip,
        shell::shellquote(name),
        if up { "up" } else { "down" }
    )
}

/// Deletes a device
pub fn build_del_link_cmd(ip: &str, name: &str) -> String {
    format!("{} link del dev {}", ip, shell::shellquote(name))
}

/// [`DeviceManager`] backed by the `ip` command
#[derive(Debug, Clone)]
pub struct IpLinkManager {
    ip_cmd: String,
}

impl Default for IpLinkManager {
    fn default() -> Self {
        Self::new(shell::IP_CMD)
    }
}

impl IpLinkManager {
    pub fn new(ip_cmd: impl Into<String>) -> Self {
        Self {
            ip_cmd: ip_cmd.into(),
        }
    }

    /// Looks `name` up; `None` when `ip` cannot show it.
    pub async fn show(&self, name: &str) -> AgentResult<Option<LinkState>> {
        let result = shell::exec(&build_show_link_cmd(&self.ip_cmd, name)).await?;
        if !result.success() {
            debug!(device = %name, stderr = %result.stderr, "Link not found");
            return Ok(None);
        }
        parse_link_json(&result.stdout)
            .map(Some)
            .map_err(|e| match e {
                AgentError::Device { message, .. } => AgentError::device(name, message),
                other => other,
            })
    }

    async fn run(&self, cmd: String) -> AgentResult<()> {
        shell::exec_or_throw(&cmd).await.map(|_| ())
    }

    async fn existing_tap(&self, name: &str) -> AgentResult<LinkState> {
        match self.show(name).await? {
            Some(link) if link.is_tap() => Ok(link),
            Some(link) => Err(AgentError::device(
                name,
                format!("exists but is not a tap (kind '{}')", link.kind),
            )),
            None => Err(AgentError::not_found("link", name)),
        }
    }
}

#[async_trait]
impl DeviceManager for IpLinkManager {
    #[instrument(skip(self))]
    async fn create_tap(&self, name: &str, mtu: u32, vnet_hdr: bool) -> AgentResult<String> {
        match self.show(name).await? {
            Some(link) if link.is_tap() => {
                if link.mtu != mtu {
                    self.run(build_set_mtu_cmd(&self.ip_cmd, name, mtu)).await?;
                    info!("Updated MTU of {} from {} to {}", name, link.mtu, mtu);
                } else {
                    debug!("Tap {} already exists", name);
                }
            }
            Some(link) => {
                return Err(AgentError::device(
                    name,
                    format!("exists but is not a tap (kind '{}')", link.kind),
                ))
            }
            None => {
                self.run(build_add_tap_cmd(&self.ip_cmd, name, vnet_hdr))
                    .await?;
                self.run(build_set_mtu_cmd(&self.ip_cmd, name, mtu)).await?;
                info!("Created tap {} (mtu {})", name, mtu);
            }
        }
        Ok(name.to_string())
    }

    #[instrument(skip(self))]
    async fn delete_link(&self, name: &str) -> AgentResult<()> {
        if self.show(name).await?.is_none() {
            warn!("Link {} does not exist, nothing to delete", name);
            return Ok(());
        }
        self.run(build_del_link_cmd(&self.ip_cmd, name)).await?;
        info!("Deleted link {}", name);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_link_up(&self, name: &str) -> AgentResult<String> {
        let link = self.existing_tap(name).await?;
        if !link.admin_up {
            self.run(build_set_link_state_cmd(&self.ip_cmd, name, true))
                .await?;
        }
        Ok(link.name)
    }

    #[instrument(skip(self))]
    async fn set_link_down(&self, name: &str) -> AgentResult<()> {
        if self.show(name).await?.is_none() {
            return Err(AgentError::not_found("link", name));
        }
        self.run(build_set_link_state_cmd(&self.ip_cmd, name, false))
            .await
    }
}
