use std::{
    env,
    error::Error,
    io::{self, BufRead, Write},
    net::TcpStream,
};

use privsearch_client::{Client, LineEmbedder, StreamTransport};

use tracing::info;
use tracing_subscriber::EnvFilter;

const SERVER_IP: &str = "127.0.0.1";
const SERVER_PORT: u16 = 8080;

/// Usage: `client <embedding program> [<args>...]`. The program reads one query per line, and answers with one line
/// `{"Cluster_index": .., "Emb": [..]}`.
fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let mut args = env::args().skip(1);
    let program = args.next().ok_or("missing embedding program")?;
    let mut embedder = LineEmbedder::spawn(program, args)?;

    let server_address = format!("{}:{}", SERVER_IP, SERVER_PORT);
    let stream = TcpStream::connect(&server_address)?;
    info!(address = %server_address, "Connected to PrivSearch server");

    let mut client = Client::connect(StreamTransport::new(stream))?;
    println!("Ready, searching {} documents in {} clusters", client.params().num_docs, client.num_clusters());

    let stdin = io::stdin();
    loop {
        print!("Enter private search query: ");
        io::stdout().flush()?;

        let mut text = String::new();
        if stdin.lock().read_line(&mut text)? == 0 {
            break;
        }

        let text = text.trim();
        if text.is_empty() || text == "quit" {
            break;
        }

        let outcome = client.search(text, &mut embedder)?;
        println!("Document {} of cluster {} is the best match", outcome.best_document, outcome.cluster_index);
        for (rank, result) in outcome.results.iter().enumerate() {
            println!("\t{:>3}) [score {:>4}] {}", rank + 1, result.score, result.url.as_deref().unwrap_or("-"));
        }

        client.preprocess()?;
    }

    client.close();
    Ok(())
}
