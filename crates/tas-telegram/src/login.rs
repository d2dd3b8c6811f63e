//! Interactive login: prompts for phone, code and (if enabled) the 2FA
//! password, then saves the session file for subsequent runs.

use std::io::{self, Write};

use grammers_client::SignInError;

use tas_core::{config::Config, Result};

use crate::{connect_client, map_err};

pub async fn interactive_login(cfg: &Config) -> Result<()> {
    let client = connect_client(cfg).await?;

    if client.is_authorized().await.map_err(map_err)? {
        println!(
            "Already authorized; session at {}",
            cfg.session_file.display()
        );
        return Ok(());
    }

    let phone = prompt("Please enter your number: ")?;
    let token = client
        .request_login_code(phone.trim())
        .await
        .map_err(map_err)?;

    let code = prompt("Please enter the code you received: ")?;
    match client.sign_in(&token, code.trim()).await {
        Ok(_) => {}
        Err(SignInError::PasswordRequired(password_token)) => {
            let password = prompt("Please enter your password: ")?;
            client
                .check_password(password_token, password.trim())
                .await
                .map_err(map_err)?;
        }
        Err(other) => return Err(map_err(other)),
    }

    client.session().save_to_file(&cfg.session_file)?;
    println!("You should now be connected.");
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line)
}
