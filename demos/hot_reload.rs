use flat_config::{Config, record};
use std::{fs, sync::mpsc, time::Duration};
use tracing_subscriber::EnvFilter;

#[record]
#[derive(Debug, Default)]
struct Limits {
    #[record(path = "limits.requests")]
    requests: u32,
    #[record(path = "limits.burst")]
    burst: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flat_config=debug")),
        )
        .init();

    let temp_dir = tempfile::tempdir()?;
    let path = temp_dir.path().join("limits.conf");
    fs::write(&path, "[limits]\nrequests = 100\nburst = 10\n")?;

    let config = Config::new();
    config.open([&path])?;
    config.warm_shape_cache();

    let limits: Limits = config.bind()?;
    println!("Initial: {:?}", limits);

    // The callback runs on its own thread; hand the event back to main
    let (tx, rx) = mpsc::channel();
    config.set_on_reload(move || {
        let _ = tx.send(());
    });

    fs::write(&path, "[limits]\nrequests = 250\nburst = 25\n")?;
    rx.recv_timeout(Duration::from_secs(10))?;

    let limits: Limits = config.bind()?;
    println!("Reloaded: {:?}", limits);

    // A broken edit is rejected and the last good values stay live
    fs::write(&path, "[limits]\nrequests = 250\ninclude\n")?;
    std::thread::sleep(Duration::from_millis(500));
    println!("After broken edit: {:?}", config.bind::<Limits>()?);

    println!("{:#?}", config.stats());
    config.close();

    Ok(())
}
