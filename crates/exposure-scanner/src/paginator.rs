//! Collects a profile's complete result set from the provider.

use exposure_core::{ProfileRef, ScanResultRecord};
use exposure_provider::{ProviderError, Result, ScanProviderClient};

/// Walks result pages from 1 until the provider reports the last page.
///
/// Each page is requested exactly once, in increasing order. Any page
/// failure aborts the whole fetch so callers never see a partial set.
pub struct ResultPaginator<'a> {
    provider: &'a dyn ScanProviderClient,
    page_size: u32,
}

impl<'a> ResultPaginator<'a> {
    /// Create a paginator requesting `page_size` records per page.
    #[must_use]
    pub fn new(provider: &'a dyn ScanProviderClient, page_size: u32) -> Self {
        Self {
            provider,
            page_size,
        }
    }

    /// Fetch every page and merge the records in provider order.
    pub async fn fetch_all(&self, profile: ProfileRef) -> Result<Vec<ScanResultRecord>> {
        let mut merged = Vec::new();
        let mut page = 1;

        loop {
            let result = self
                .provider
                .fetch_result_page(profile, page, self.page_size)
                .await?;

            if result.page_number != page {
                return Err(ProviderError::PageMismatch {
                    requested: page,
                    returned: result.page_number,
                });
            }

            tracing::debug!(
                "Fetched result page {}/{} for profile {} ({} records)",
                page,
                result.last_page_number,
                profile,
                result.items.len()
            );

            let last = result.is_last();
            merged.extend(result.items);
            if last {
                break;
            }
            page += 1;
        }

        Ok(merged)
    }
}
