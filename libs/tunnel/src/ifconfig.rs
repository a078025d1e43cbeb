//! Interface provisioning: assign addresses, set the MTU, flip the link.
//!
//! Linux talks netlink directly; the BSDs go through `ifconfig`, Windows
//! through `netsh`. Provisioning failures are surfaced to the caller, which
//! treats them as non-fatal (the datapath works regardless, routing just won't
//! be in place).

use anyhow::Result;

use crate::config::Config;

#[cfg(target_os = "linux")]
pub(crate) async fn up(config: &Config) -> Result<()> {
    use anyhow::Context as _;

    let (connection, handle, _) = rtnetlink::new_connection().context("Failed to open netlink")?;
    let connection = tokio::spawn(connection);

    let result = configure(&handle, config).await;
    connection.abort();

    result
}

#[cfg(target_os = "linux")]
pub(crate) async fn down(config: &Config) -> Result<()> {
    use anyhow::Context as _;

    let (connection, handle, _) = rtnetlink::new_connection().context("Failed to open netlink")?;
    let connection = tokio::spawn(connection);

    let result = async {
        let index = link_index(&handle, &config.ifname).await?;
        handle
            .link()
            .set(rtnetlink::LinkUnspec::new_with_index(index).down().build())
            .execute()
            .await
            .context("Failed to set link down")
    }
    .await;
    connection.abort();

    result
}

#[cfg(target_os = "linux")]
async fn configure(handle: &rtnetlink::Handle, config: &Config) -> Result<()> {
    use anyhow::Context as _;

    let index = link_index(handle, &config.ifname).await?;

    handle
        .address()
        .add(
            index,
            config.tun_local_ip.into(),
            prefix_len(config.tun_netmask),
        )
        .execute()
        .await
        .context("Failed to assign address")?;
    handle
        .link()
        .set(
            rtnetlink::LinkUnspec::new_with_index(index)
                .mtu(u32::from(config.mtu))
                .build(),
        )
        .execute()
        .await
        .context("Failed to set MTU")?;
    handle
        .link()
        .set(rtnetlink::LinkUnspec::new_with_index(index).up().build())
        .execute()
        .await
        .context("Failed to set link up")?;

    tracing::info!(
        "Device {} IP({}) up",
        config.ifname,
        config.tun_local_ip
    );

    Ok(())
}

#[cfg(target_os = "linux")]
async fn link_index(handle: &rtnetlink::Handle, ifname: &str) -> Result<u32> {
    use anyhow::Context as _;
    use futures::TryStreamExt as _;

    let link = handle
        .link()
        .get()
        .match_name(ifname.to_owned())
        .execute()
        .try_next()
        .await
        .context("Failed to look up link")?
        .with_context(|| format!("no interface named `{ifname}`"))?;

    Ok(link.header.index)
}

#[cfg(target_os = "linux")]
fn prefix_len(netmask: std::net::Ipv4Addr) -> u8 {
    u32::from(netmask).count_ones() as u8
}

#[cfg(all(unix, not(target_os = "linux")))]
pub(crate) async fn up(config: &Config) -> Result<()> {
    run(
        "ifconfig",
        &[
            &config.ifname,
            &config.tun_local_ip.to_string(),
            &config.tun_remote_ip.to_string(),
            "netmask",
            &config.tun_netmask.to_string(),
            "mtu",
            &config.mtu.to_string(),
            "up",
        ],
    )
    .await?;

    tracing::info!(
        "Device {} IP({}) up",
        config.ifname,
        config.tun_local_ip
    );

    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
pub(crate) async fn down(config: &Config) -> Result<()> {
    run("ifconfig", &[&config.ifname, "down"]).await
}

#[cfg(windows)]
pub(crate) async fn up(config: &Config) -> Result<()> {
    run(
        "netsh",
        &[
            "interface",
            "ip",
            "set",
            "address",
            &config.ifname,
            "static",
            &config.tun_local_ip.to_string(),
            &config.tun_netmask.to_string(),
        ],
    )
    .await
}

#[cfg(windows)]
pub(crate) async fn down(_config: &Config) -> Result<()> {
    // The wintun adapter disappears with its session.
    Ok(())
}

#[cfg(not(target_os = "linux"))]
async fn run(program: &str, args: &[&str]) -> Result<()> {
    use anyhow::Context as _;

    let status = tokio::process::Command::new(program)
        .args(args)
        .status()
        .await
        .with_context(|| format!("Failed to run `{program}`"))?;

    anyhow::ensure!(status.success(), "`{program}` exited with {status}");

    Ok(())
}
