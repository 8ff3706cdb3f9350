use std::path::Path;

use stash_core::auth::AuthUser;

use crate::cli::AuthCommands;
use crate::commands::common::open_session;
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands, db_path: &Path) -> Result<(), CliError> {
    let session = open_session(db_path).await?;
    let auth = session.auth();

    match command {
        AuthCommands::Register { email, password } => {
            let user = auth.register(&email, &password).await?;
            println!("Registered and signed in as {}", user_label(&user));
        }
        AuthCommands::Login { email, password } => {
            let user = auth.login(&email, &password).await?;
            println!("Signed in as {}", user_label(&user));
        }
        AuthCommands::Status => {
            if !auth.is_authenticated() {
                println!("Not signed in.");
                return Ok(());
            }
            match auth.me().await {
                Ok(user) => println!("Signed in as {}", user_label(&user)),
                Err(error) if error.is_connectivity() => {
                    println!("Signed in (backend unreachable: {error})");
                }
                Err(error) => return Err(error.into()),
            }
        }
        AuthCommands::Logout => {
            session.logout().await?;
            println!("Signed out; local data removed");
        }
    }
    Ok(())
}

fn user_label(user: &AuthUser) -> String {
    user.email.clone().unwrap_or_else(|| user.id.clone())
}
