//! Composite acquisition with a single date-window fallback.

use sprawl_oracle::Oracle;
use sprawl_oracle_models::{CompositeHandle, CompositeRequest};
use sprawl_region_models::DateWindow;

use crate::AnalysisError;

/// A composite together with the window it was actually built from.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquiredComposite {
    /// Oracle handle.
    pub handle: CompositeHandle,
    /// Window the scenes came from.
    pub window: DateWindow,
    /// Scenes matched in that window.
    pub image_count: u64,
    /// Whether the fallback window had to be used.
    pub widened: bool,
}

/// Builds a composite for `request`.
///
/// If no scene matches the requested window, the window is widened once by
/// `margin_days` on both ends. A second empty result is terminal.
///
/// # Errors
///
/// * [`AnalysisError::NoImagesFound`] with the widened bounds if neither
///   window has a scene
/// * [`AnalysisError::Region`] if the widened window leaves the calendar
/// * [`AnalysisError::Oracle`] if an oracle call fails
pub async fn acquire_composite<O: Oracle + ?Sized>(
    oracle: &O,
    request: &CompositeRequest,
    margin_days: u32,
) -> Result<AcquiredComposite, AnalysisError> {
    let mut request = request.clone();
    let mut widened = false;
    let mut image_count = oracle.image_count(&request).await?;

    if image_count == 0 {
        let window = request.window.widened(margin_days)?;
        log::warn!("No images between {}; retrying with {window}", request.window);
        request = request.with_window(window);
        widened = true;
        image_count = oracle.image_count(&request).await?;

        if image_count == 0 {
            return Err(AnalysisError::NoImagesFound {
                start: window.start,
                end: window.end,
            });
        }
    }

    log::info!(
        "Compositing {image_count} {} scene(s) from {}",
        request.sensor,
        request.window
    );
    let handle = oracle.composite(&request).await?;

    Ok(AcquiredComposite {
        handle,
        window: request.window,
        image_count,
        widened,
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use sprawl_oracle::memory::OracleCall;

    use super::*;
    use crate::testing::{self, Reflectance};

    #[tokio::test]
    async fn narrow_window_is_used_when_it_has_images() {
        let oracle =
            testing::two_date_oracle(Reflectance::new(0.4, 0.1), Reflectance::new(0.3, 0.2));
        let request = testing::request(testing::START);

        let acquired = acquire_composite(&oracle, &request, 30).await.unwrap();

        assert!(!acquired.widened);
        assert_eq!(acquired.image_count, 1);
        assert_eq!(acquired.window, request.window);
        assert_eq!(
            oracle.calls(),
            vec![
                OracleCall::ImageCount(request.window),
                OracleCall::Composite(request.window),
            ]
        );
    }

    #[tokio::test]
    async fn empty_window_is_widened_once() {
        let oracle = testing::oracle(
            vec![testing::uniform_scene("2020-01-20", Reflectance::new(0.4, 0.1))],
            None,
        );
        let request = testing::request(testing::START);

        let acquired = acquire_composite(&oracle, &request, 30).await.unwrap();

        assert!(acquired.widened);
        assert_eq!(acquired.window.start, testing::date("2019-12-02"));
        assert_eq!(acquired.window.end, testing::date("2020-02-01"));
        assert_eq!(acquired.image_count, 1);
    }

    #[tokio::test]
    async fn second_empty_window_is_terminal() {
        let oracle = testing::empty_oracle();
        let request = testing::request(testing::START);

        let err = acquire_composite(&oracle, &request, 30).await.unwrap_err();

        match err {
            AnalysisError::NoImagesFound { start, end } => {
                assert_eq!(start, testing::date("2019-12-02"));
                assert_eq!(end, testing::date("2020-02-01"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let calls = oracle.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| matches!(c, OracleCall::ImageCount(_))));
    }

    #[tokio::test]
    async fn widening_past_the_calendar_is_an_error() {
        let oracle = testing::empty_oracle();
        let mut request = testing::request(testing::START);
        request.window = DateWindow {
            start: NaiveDate::MAX.pred_opt().unwrap(),
            end: NaiveDate::MAX,
        };

        let err = acquire_composite(&oracle, &request, 30).await.unwrap_err();

        assert!(matches!(err, AnalysisError::Region(_)));
        assert_eq!(oracle.calls(), vec![OracleCall::ImageCount(request.window)]);
    }
}
