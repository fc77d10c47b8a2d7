/*!
 * Resumable batch progress.
 *
 * This module provides:
 * - The persisted `TranslationProgressRecord`
 * - `SessionManager`, which creates, resumes and durably updates records
 */

pub mod manager;
pub mod models;

pub use manager::{PersistPolicy, SessionManager};
pub use models::{
    ProgressStatus, RestartReason, ResumeResult, SessionBeginParams, SessionInfo,
    TranslationProgressRecord,
};
