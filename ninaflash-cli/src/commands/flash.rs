//! Flash, certificate and MD5 command implementations.

use {
    crate::{
        Cli, CliError, config::Config, get_port, resolve_baud, resolve_chunk_size,
        use_fancy_output, was_interrupted,
    },
    anyhow::{Context, Result},
    console::style,
    indicatif::{ProgressBar, ProgressStyle},
    log::debug,
    ninaflash::{
        BootRom, NativePort, SerialControlLine, config::ROM_BAUD, gpio::StdDelay,
    },
    std::path::Path,
};

/// Flash offset of the TLS root certificate partition.
const CERTS_OFFSET: u32 = 0x10000;

/// Capacity of the certificate partition.
const CERTS_MAX_LEN: usize = 0x20000;

type Rom = BootRom<NativePort, SerialControlLine, SerialControlLine, StdDelay>;

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if data.is_empty() {
        return Err(CliError::Usage(format!("{} is empty", path.display())).into());
    }
    Ok(data)
}

/// Open the port, enter the boot ROM and run `f`; the driver is always ended.
fn with_bootrom<T, F>(cli: &Cli, config: &Config, f: F) -> Result<T>
where
    F: FnOnce(&mut Rom) -> Result<T>,
{
    let port_name = get_port(cli, config)?;
    let baud = resolve_baud(cli, config);
    if !cli.quiet {
        eprintln!(
            "{} Using port {port_name} at {baud} baud",
            style("🔌").cyan()
        );
    }

    let port = NativePort::open_simple(&port_name, ROM_BAUD)
        .with_context(|| format!("Failed to open {port_name}"))?;
    let (boot, reset) = port.control_lines()?;
    let mut rom = BootRom::new(
        port,
        boot,
        reset,
        StdDelay,
        config.bootrom_config(cli.no_reset),
    );

    if !cli.quiet {
        eprintln!("{} Waiting for the boot ROM...", style("⏳").yellow());
    }
    let result = rom
        .begin(baud)
        .context("Failed to connect to the boot ROM")
        .and_then(|()| {
            if !cli.quiet {
                eprintln!("{} Connected", style("✓").green());
            }
            ensure_not_interrupted()?;
            f(&mut rom)
        });
    rom.end();
    debug!("Port {port_name} released");
    result
}

fn progress_bar(cli: &Cli, total: usize) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Write `data` at `offset`, optionally verify, then close the session.
fn write_region(
    cli: &Cli,
    config: &Config,
    rom: &mut Rom,
    offset: u32,
    data: &[u8],
    verify: bool,
    reboot: bool,
) -> Result<()> {
    let chunk_size = resolve_chunk_size(cli, config);
    let pb = progress_bar(cli, data.len());
    pb.set_message(format!("0x{offset:08X}"));

    let written = rom.flash_region(offset, data, chunk_size, |done, _| {
        pb.set_position(done as u64);
    });
    if let Err(err) = written {
        pb.abandon();
        return Err(err).context(format!("Failed to write flash at 0x{offset:08X}"));
    }
    pb.finish_with_message("done");
    ensure_not_interrupted()?;

    if verify {
        rom.verify_region(offset, data)
            .context("Verification failed")?;
        if !cli.quiet {
            eprintln!("{} MD5 verified", style("✓").green());
        }
    }

    if !cli.quiet && reboot {
        eprintln!("{} Rebooting", style("🔄").cyan());
    }
    rom.end_flash(reboot)
        .context("Failed to finish the flash session")?;
    Ok(())
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &Config,
    firmware: &Path,
    address: u32,
    no_verify: bool,
    no_reboot: bool,
) -> Result<()> {
    let data = read_image(firmware)?;
    if !cli.quiet {
        eprintln!(
            "{} Loaded {} ({} bytes)",
            style("📦").cyan(),
            firmware.display(),
            data.len()
        );
    }

    let verify = !(no_verify
        || config
            .flash
            .skip_verify);
    let reboot = !(no_reboot
        || config
            .flash
            .no_reboot);
    with_bootrom(cli, config, |rom| {
        write_region(cli, config, rom, address, &data, verify, reboot)
    })?;

    if !cli.quiet {
        eprintln!("\n{} Flashing completed", style("🎉").green().bold());
    }
    Ok(())
}

/// Pad a certificate bundle with zeros to a whole number of blocks.
fn pad_to_chunk(mut data: Vec<u8>, chunk_size: u32) -> Vec<u8> {
    let chunk = chunk_size.max(1) as usize;
    let padded = data
        .len()
        .div_ceil(chunk)
        * chunk;
    data.resize(padded, 0);
    data
}

/// Certificate upload implementation.
pub(crate) fn cmd_write_certs(
    cli: &Cli,
    config: &Config,
    file: &Path,
    no_reboot: bool,
) -> Result<()> {
    let data = read_image(file)?;
    if data.len() > CERTS_MAX_LEN {
        return Err(CliError::Usage(format!(
            "Certificate bundle is {} bytes; the partition holds at most {CERTS_MAX_LEN}",
            data.len()
        ))
        .into());
    }
    let data = pad_to_chunk(data, resolve_chunk_size(cli, config));

    let reboot = !(no_reboot
        || config
            .flash
            .no_reboot);
    with_bootrom(cli, config, |rom| {
        write_region(cli, config, rom, CERTS_OFFSET, &data, true, reboot)
    })?;

    if !cli.quiet {
        eprintln!("\n{} Certificates written", style("🎉").green().bold());
    }
    Ok(())
}

/// MD5 command implementation; the digest goes to stdout.
pub(crate) fn cmd_md5(cli: &Cli, config: &Config, address: u32, size: u32) -> Result<()> {
    if size == 0 {
        return Err(CliError::Usage("--size must be greater than zero".to_string()).into());
    }
    let digest = with_bootrom(cli, config, |rom| {
        rom.md5_flash(address, size)
            .with_context(|| format!("Failed to read MD5 of 0x{address:08X}+{size}"))
    })?;
    println!("{}", hex::encode(digest));
    Ok(())
}
