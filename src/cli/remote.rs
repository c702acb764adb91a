use std::sync::Arc;

use log::debug;

use crate::{
    config::ConfigFile,
    format::format_path,
    remote::{LocalRemote, RemoteUrl, S3Remote, SharedRemote, TransferCommand},
};

use super::Cli;

pub async fn create_remote(cli: &Cli, config_file: &ConfigFile) -> SharedRemote {
    match &cli.remote {
        RemoteUrl::S3 { endpoint } => {
            let transfer =
                TransferCommand::new(&cli.transfer_command, config_file.transfer_args());
            let remote = S3Remote::new(
                endpoint.clone(),
                cli.bucket.clone(),
                transfer,
                cli.grant_ttl,
            )
            .await;
            Arc::new(remote)
        }
        RemoteUrl::Local(path) => {
            let path = path.join(&cli.bucket);
            debug!("using local remote at {}", format_path(&path));
            Arc::new(LocalRemote::new(path))
        }
    }
}
