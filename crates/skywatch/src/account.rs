//! Session commands.

use miette::{IntoDiagnostic, Result, miette};
use tracing::info;

use crate::App;

/// Password from `SKYWATCH_PASSWORD` or an interactive prompt.
fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var("SKYWATCH_PASSWORD") {
        return Ok(password);
    }

    eprint!("Password: ");
    rpassword::read_password().into_diagnostic()
}

/// Log in, falling back to the remembered user when no name is given.
pub(crate) async fn login(app: &App, username: Option<String>, remember: bool) -> Result<()> {
    let username = match username {
        Some(username) => username,
        None => app
            .session
            .remembered_user()
            .await
            .ok_or_else(|| miette!("no username given and none remembered"))?,
    };

    let password = read_password()?;
    app.session
        .login(&username, &password, remember)
        .await
        .map_err(|e| miette!("{}", e.user_message()))?;

    if remember {
        println!("Logged in as {}", username);
    } else {
        info!("session is kept for this run only");
        println!("Logged in as {} (this run only)", username);
    }
    Ok(())
}

pub(crate) async fn status(app: &App) -> Result<()> {
    match app.session.session().await {
        Some(session) if session.persistent => println!("Logged in (remembered)"),
        Some(_) => println!("Logged in (this run only)"),
        None => println!("Logged out"),
    }

    if let Some(user) = app.session.remembered_user().await {
        println!("Remembered user: {}", user);
    }
    println!("Route: {:?}", app.routes.current());
    Ok(())
}
