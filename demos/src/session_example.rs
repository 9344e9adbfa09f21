use dotenv::dotenv;
use futures::future::join_all;
use serde_json::Value;
use std::env;
use std::sync::Arc;
use uuid::Uuid;
use ventu_rust::config::ClientOptions;
use ventu_rust::Ventu;
use ventu_rust_auth::{FileStorage, Registration, RegistrationProfile};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv().ok();

    let api_url = env::var("VENTU_API_URL").expect("VENTU_API_URL must be set");
    let session_dir = env::var("VENTU_SESSION_DIR").unwrap_or_else(|_| ".ventu".to_string());

    // The session survives restarts of this binary
    let storage = Arc::new(FileStorage::new(session_dir));
    println!("Session directory: {}", storage.dir().display());
    let ventu = Ventu::with_storage(&api_url, storage, ClientOptions::default());

    println!("Starting session example");

    if let Some(session) = ventu.auth().restore().await? {
        println!("Restored session for {:?}", session.user.map(|u| u.display_name()));
    } else {
        let (email, password) = match (env::var("VENTU_EMAIL"), env::var("VENTU_PASSWORD")) {
            (Ok(email), Ok(password)) => (email, password),
            _ => {
                // Register a throwaway traveler account
                let email = format!("demo-{}@example.com", Uuid::new_v4());
                let password = "securePassword123!".to_string();
                let registration = Registration {
                    email: email.clone(),
                    password: password.clone(),
                    username: None,
                    first_name: "Demo".to_string(),
                    last_name: "Traveler".to_string(),
                    profile: RegistrationProfile::Traveler {
                        cedula: None,
                        phone_number: None,
                        can_contact_by_whatsapp: false,
                    },
                };
                let response = ventu.auth().register(&registration).await?;
                println!("Registered {}: {:?}", email, response.user);
                (email, password)
            }
        };

        let session = ventu.auth().sign_in(&email, &password).await?;
        println!("Signed in as {:?}", session.user.map(|u| u.display_name()));
    }

    // Several requests at once share one token refresh if the token is stale
    let api = ventu.api();
    let api = &api;
    let results = join_all(
        ["/packages/", "/bookings/", "/users/me/"]
            .iter()
            .map(|path| async move { (path, api.get(path).execute::<Value>().await) }),
    )
    .await;

    for (path, result) in results {
        match result {
            Ok(body) => println!("{} -> {}", path, body),
            Err(e) if e.is_session_error() => {
                println!("{} -> session ended, please sign in again", path);
            }
            Err(e) => println!("{} -> {}", path, e),
        }
    }

    if env::var("VENTU_LOGOUT").is_ok() {
        ventu.auth().logout().await;
        println!("Logged out");
    }

    Ok(())
}
