use anyhow::Result;
use locsync_provider_google::consent;

use crate::config::Settings;

pub async fn run(settings: &Settings) -> Result<()> {
    println!("Authenticating with Google...");

    let refresh_token = consent::authorize(&settings.google).await?;

    println!("\nAuthentication successful!");
    println!("\nAdd the refresh token to your config.toml:");
    println!();
    println!("[google]");
    println!("refresh_token = \"{}\"", refresh_token);
    println!();
    println!("or export it as LOCSYNC__GOOGLE__REFRESH_TOKEN.");

    Ok(())
}
