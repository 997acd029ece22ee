use dlworker_protocol::DownloadProgress;
use launcher_core::ProgressObserver;

/// Logs worker telemetry as it arrives.
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_progress(&self, progress: &DownloadProgress) {
        tracing::info!(
            state = progress.state_flags,
            text = %progress.text_key,
            download = format_args!("{:.1}%", progress.download.fraction_complete * 100.0),
            rate = %progress.download.rate_display,
            build = format_args!("{:.1}%", progress.build.fraction_complete * 100.0),
            "Download progress"
        );
    }
}
