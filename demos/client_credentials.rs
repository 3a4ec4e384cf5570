use dotenvy::dotenv;
use spotify_http::client::{RequestOptions, SpotifyClientBuilder};

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    let spotify_client = SpotifyClientBuilder::new()
        .client_credentials(
            std::env::var("CLIENT_ID").expect("Spotify client ID not in environment"),
            std::env::var("CLIENT_SECRET").expect("Spotify client secret not in environment"),
        )
        .build()
        .expect("failed to build Spotify client");

    // the first request acquires an access token with the client credentials flow, the rest reuse it
    let one_track: serde_json::Value = spotify_client
        .get("/tracks/2PoYyfBkedDBPGAh0ZUoHW", RequestOptions::new())
        .await
        .unwrap()
        .json()
        .unwrap();

    println!(
        "{} - {} ({})",
        one_track["name"].as_str().unwrap(),
        one_track["artists"][0]["name"].as_str().unwrap(),
        one_track["album"]["name"].as_str().unwrap()
    );

    let search: serde_json::Value = spotify_client
        .get(
            "/search",
            RequestOptions::new()
                .query("q", "the knife")
                .query("type", "artist")
                .query("limit", "1"),
        )
        .await
        .unwrap()
        .json()
        .unwrap();

    println!("{}", search["artists"]["items"][0]["name"]);
}
