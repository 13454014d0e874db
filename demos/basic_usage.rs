use flat_config::{Config, ConfigOptions, record};
use std::fs;

/// The whole application configuration, bound from nested sections.
#[record]
#[derive(Debug, Default)]
struct AppConfig {
    #[record(path = "app")]
    app: App,
    #[record(path = "servers")]
    servers: Vec<Server>,
}

#[record]
#[derive(Debug, Default)]
struct App {
    #[record(path = "name")]
    name: String,
    #[record(path = "debug")]
    debug: bool,
}

#[record]
#[derive(Debug, Default)]
struct Server {
    #[record(path = "host")]
    host: String,
    #[record(path = "port")]
    port: u16,
}

/// A record picking single values out of the store by full path.
#[record]
#[derive(Debug, Default)]
struct Account {
    // Declared as a string, so the leading zeros survive.
    #[record(path = "user.id")]
    id: String,
    #[record(path = "user.quota")]
    quota: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempfile::tempdir()?;

    let base = temp_dir.path().join("base.conf");
    fs::write(
        &base,
        r#"
[app]
name = "demo app"   # quotes are removed
debug = false

[user]
id = 0001234
quota = 500
"#,
    )?;

    let local = temp_dir.path().join("local.json");
    fs::write(
        &local,
        r#"{"app": {"debug": true}, "servers": [{"host": "a", "port": 1}, {"host": "b", "port": 2}]}"#,
    )?;

    // This demo does not need the watch task
    let config = Config::with_options(ConfigOptions::builder().watch(false).build()?);

    // Later sources override earlier ones
    config.open([&base, &local])?;

    println!("Keys:");
    for key in config.get_all_keys() {
        println!("  {key}");
    }

    println!("app.debug = {}", config.get_bool_or("app.debug", false));
    println!("missing   = {}", config.get_int_or("app.missing", 42));

    let app: AppConfig = config.bind()?;
    println!("{:#?}", app);

    let account: Account = config.bind()?;
    println!("{:#?}", account);

    let servers: Vec<Server> = config.get_array_to("servers")?;
    println!("{} servers", servers.len());

    println!("Typed export:\n{}", config.get_all_json()?);
    println!("{:#?}", config.stats());

    Ok(())
}
