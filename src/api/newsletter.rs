//! Newsletter API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{
    CreateNewsletterRequest, Newsletter, SendReport, Subscriber, SubscriptionRequest,
};
use crate::AppState;

/// POST /api/newsletter/subscribe
pub async fn subscribe(
    State(state): State<AppState>,
    Json(request): Json<SubscriptionRequest>,
) -> ApiResult<Subscriber> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.subscribe(&request.email).await {
        Ok(subscriber) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(subscriber, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/newsletter/unsubscribe
pub async fn unsubscribe(
    State(state): State<AppState>,
    Json(request): Json<SubscriptionRequest>,
) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.unsubscribe(&request.email).await {
        Ok(()) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success((), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/admin/subscribers - Active subscribers.
pub async fn list_subscribers(State(state): State<AppState>) -> ApiResult<Vec<Subscriber>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_active_subscribers().await {
        Ok(subscribers) => success(subscribers, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/admin/newsletters
pub async fn list_newsletters(State(state): State<AppState>) -> ApiResult<Vec<Newsletter>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_newsletters().await {
        Ok(newsletters) => success(newsletters, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/admin/newsletters - Draft a newsletter.
pub async fn create_newsletter(
    State(state): State<AppState>,
    Json(request): Json<CreateNewsletterRequest>,
) -> ApiResult<Newsletter> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.create_newsletter(&request).await {
        Ok(newsletter) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(newsletter, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/admin/newsletters/:id/send - Mail it to every active subscriber.
pub async fn send_newsletter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SendReport> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let newsletter = match state.repo.claim_newsletter(&id).await {
        Ok(newsletter) => newsletter,
        Err(e) => return error(e, revision_id),
    };

    let recipients: Vec<String> = match state.repo.list_active_subscribers().await {
        Ok(subscribers) => subscribers.into_iter().map(|s| s.email).collect(),
        Err(e) => return release_and_fail(&state, &id, e, revision_id).await,
    };

    let delivered = match state
        .email
        .send_to_all(&recipients, &newsletter.subject, &newsletter.body_html)
        .await
    {
        Ok(delivered) => delivered,
        Err(e) => return release_and_fail(&state, &id, e, revision_id).await,
    };

    match state
        .repo
        .mark_newsletter_sent(&id, delivered as i64)
        .await
    {
        Ok(newsletter) => {
            tracing::info!(newsletter_id = %id, delivered, "Newsletter sent");
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(
                SendReport {
                    newsletter,
                    delivered,
                    dry_run: state.email.is_dry_run(),
                },
                new_revision,
            )
        }
        Err(e) => error(e, revision_id),
    }
}

/// Give a claimed newsletter back when delivery did not go through.
async fn release_and_fail(
    state: &AppState,
    id: &str,
    cause: AppError,
    revision_id: i64,
) -> ApiResult<SendReport> {
    if let Err(e) = state.repo.release_newsletter(id).await {
        tracing::warn!(newsletter_id = %id, error = %e, "Failed to release newsletter claim");
    }
    let revision_id = state.repo.get_revision_id().await.unwrap_or(revision_id);
    error(cause, revision_id)
}
