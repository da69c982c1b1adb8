use service_bringup::credentials::CredentialStore;
use service_bringup::output::UserOutput;
use service_bringup::Config;

pub fn run_credentials(
    config: &Config,
    show_passwords: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let store = CredentialStore::new(&config.credentials_file);
    let Some(values) = store.load()? else {
        out.status(&format!(
            "No credentials at {}. Run `bringup up` first.",
            store.path().display()
        ));
        return Ok(());
    };

    let mut keys: Vec<_> = values.keys().collect();
    keys.sort();
    for key in keys {
        let value = &values[key];
        if key.contains("PASSWORD") && !show_passwords {
            println!("{}=********", key);
        } else {
            println!("{}={}", key, value);
        }
    }
    Ok(())
}
