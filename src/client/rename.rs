use super::Session;
use crate::{
    error::{Error, Op, RemoteResult},
    locator::RemoteLocator,
};

impl Session {
    /// Renames (moves) `source_path` to `destination_path`, both taken
    /// relative to the share of `locator`. Moves across shares are not
    /// supported by the service.
    pub async fn rename(
        &self,
        locator: &RemoteLocator,
        source_path: &str,
        destination_path: &str,
    ) -> RemoteResult<()> {
        self.timed(async {
            let conn = self.connect().await?;
            let old_url = locator.url_for(source_path);
            let new_url = locator.url_for(destination_path);

            if let Err(status) = conn.rename(&old_url, &new_url).await {
                warn!(
                    "rename failed '{}' -> '{}': {}",
                    old_url, new_url, status
                );
                return Err(Error::Service {
                    op: Op::Rename,
                    url: old_url,
                    status,
                });
            }

            info!("renamed '{}' -> '{}'", old_url, new_url);
            Ok(())
        })
        .await
    }
}
