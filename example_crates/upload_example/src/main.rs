use anyhow::Context;
use clap::value_t;
use log::info;
use resumable_upload_common as common;

use std::path::Path;

struct UploadConfig {
    session: String,
    media_type: Option<String>,
    chunksize: Option<usize>,
    retries: Option<u32>,
}

async fn upload_file(
    cl: &common::TlsClient,
    cfg: &UploadConfig,
    p: &Path,
    cancel: common::CancellationToken,
) -> common::Result<()> {
    let f = tokio::fs::OpenOptions::new()
        .read(true)
        .open(p)
        .await
        .with_context(|| format!("opening {}", p.display()))?;
    let len = f.metadata().await?.len();

    let mut upload =
        common::ResumableUpload::<common::serde_json::Value>::from_session_uri(&cfg.session, cl)?;
    upload.set_cancellation_token(cancel);
    upload.set_progress_callback(move |sent| println!("Uploaded {} of {} bytes.", sent, len));
    if let Some(mt) = cfg.media_type.as_ref() {
        upload.set_media_type(mt.as_str());
    }
    if let Some(size) = cfg.chunksize {
        upload.set_max_chunksize(size)?;
    }
    if let Some(n) = cfg.retries {
        upload.set_retry_policy(common::RetryPolicy {
            max_retries: n,
            ..Default::default()
        });
    }

    let result = upload.upload_file(f).await?;
    info!("Upload finished with media type {}", upload.media_type());

    println!(
        "Uploaded object: {}",
        common::serde_json::to_string_pretty(&result)?
    );
    Ok(())
}

/// `None` if the flag wasn't given; exits with clap's usage error if it isn't a number.
fn optional_number<T: std::str::FromStr>(matches: &clap::ArgMatches, name: &str) -> Option<T> {
    if !matches.is_present(name) {
        return None;
    }
    Some(clap::value_t!(matches, name, T).unwrap_or_else(|e| e.exit()))
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let matches = clap::App::new("upload_example")
        .version("0.1")
        .about("Upload a file to a resumable upload session, e.g. one started by a GCS objects.insert call with uploadType=resumable.")
        .arg(
            clap::Arg::with_name("SESSION")
                .help("Session URI, as returned in the Location: header of the initiating request")
                .long("session")
                .required(true)
                .short("s")
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("MEDIA_TYPE")
                .help("Media type of the content. Detected from the file contents if not given.")
                .long("media-type")
                .short("m")
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("CHUNKSIZE")
                .help("Bytes per request; must be a multiple of 262144.")
                .long("chunksize")
                .short("c")
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("RETRIES")
                .help("How often to retry a chunk after a transient error.")
                .long("retries")
                .short("r")
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("FILE")
                .help("File to upload")
                .required(true)
                .index(1),
        )
        .get_matches();

    let cfg = UploadConfig {
        session: matches
            .value_of("SESSION")
            .expect("--session is a mandatory argument.")
            .into(),
        media_type: matches.value_of("MEDIA_TYPE").map(String::from),
        chunksize: optional_number(&matches, "CHUNKSIZE"),
        retries: optional_number(&matches, "RETRIES"),
    };
    let fp = matches
        .value_of("FILE")
        .expect("FILE is a mandatory argument.");

    // Ctrl-C stops the upload before the next chunk.
    let cancel = common::CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted; canceling upload after the current chunk.");
            on_signal.cancel();
        }
    });

    let https_client = common::https_client();
    upload_file(&https_client, &cfg, Path::new(fp), cancel)
        .await
        .expect("Upload failed :(");
}
