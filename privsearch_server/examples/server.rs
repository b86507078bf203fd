use std::{env, error::Error, sync::Arc};

use privsearch_server::{EmbeddingsCorpus, SearchConfig, Server, UrlsCorpus, open_cluster_files, wire};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const HOST_IP: &str = "127.0.0.1";
const HOST_PORT: u16 = 8080;

const DEMO_CLUSTERS: [&str; 3] = [
    "https://rust-lang.org\t12,3,-4,7,0,1,-2,5\nhttps://crates.io\t10,2,-3,6,1,0,-1,4\n-----\nhttps://docs.rs\t9,4,-2,5,0,2,-3,6\n",
    "https://www.openstreetmap.org\t-8,1,6,0,-3,2,9,-1\nhttps://wikipedia.org\t-6,0,7,1,-2,3,8,0\n",
    "https://eprint.iacr.org\t2,-9,0,3,11,-4,1,2\n-----\nhttps://arxiv.org\t1,-8,1,2,10,-3,0,3\nhttps://ia.cr\t3,-10,0,4,12,-5,2,1\n",
];

/// Usage: `server [<corpus directory> <number of clusters> [<config.toml>]]`. Without arguments a small demo corpus is served.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = env::args().skip(1).collect::<Vec<String>>();
    let server = match args.as_slice() {
        [dir, num_clusters, rest @ ..] => {
            let config = match rest.first() {
                Some(path) => SearchConfig::from_file(path)?,
                None => SearchConfig::default(),
            };
            let num_clusters = num_clusters.parse::<u64>()?;

            let embeddings = EmbeddingsCorpus::read(open_cluster_files(dir, 0..num_clusters)?, &config)?;
            let urls = UrlsCorpus::read(open_cluster_files(dir, 0..num_clusters)?, &config)?;
            Server::setup(Some(&embeddings), Some(&urls), &config)?
        }
        _ => {
            let config = SearchConfig {
                embedding_dim: 8,
                embeddings_hint_size: 1,
                urls_hint_size: 1,
                ..SearchConfig::default()
            };
            let clusters = || DEMO_CLUSTERS.iter().enumerate().map(|(c, text)| (c as u64, text.as_bytes()));

            let embeddings = EmbeddingsCorpus::read(clusters(), &config)?;
            let urls = UrlsCorpus::read(clusters(), &config)?;
            Server::setup(Some(&embeddings), Some(&urls), &config)?
        }
    };

    let server_address = format!("{}:{}", HOST_IP, HOST_PORT);
    let listener = TcpListener::bind(&server_address).await?;
    info!(address = %server_address, "PrivSearch server listening");

    let max_request_len = server.max_request_byte_len();
    let arced_server = Arc::new(server);

    loop {
        let (mut stream, peer_address) = listener.accept().await?;
        info!(peer = %peer_address, "New connection from PrivSearch client");

        // Cheap cloning, because it's Arced !
        let cloned_server = arced_server.clone();

        tokio::spawn(async move {
            loop {
                let mut request_len_buf = [0u8; 4];
                if stream.read_exact(&mut request_len_buf).await.is_err() {
                    info!(peer = %peer_address, "PrivSearch client disconnected");
                    break;
                }

                let request_len = match wire::frame_len(request_len_buf, max_request_len) {
                    Ok(len) => len,
                    Err(e) => {
                        warn!(peer = %peer_address, error = %e, "Dropping connection");
                        break;
                    }
                };

                let mut request = vec![0u8; request_len];
                if let Err(e) = stream.read_exact(&mut request).await {
                    warn!(peer = %peer_address, error = %e, "Failed to read request");
                    break;
                }

                // Answering is compute-bound, keep it off the async workers.
                let server = cloned_server.clone();
                let response = match tokio::task::spawn_blocking(move || server.respond_bytes(&request)).await {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => {
                        warn!(peer = %peer_address, error = %e, "Failed to encode response");
                        break;
                    }
                    Err(e) => {
                        warn!(peer = %peer_address, error = %e, "Request handler panicked");
                        break;
                    }
                };

                let response_len = response.len() as u32;
                if stream.write_all(&response_len.to_le_bytes()).await.is_err() || stream.write_all(&response).await.is_err() {
                    warn!(peer = %peer_address, "Failed to send response");
                    break;
                }
            }
        });
    }
}
