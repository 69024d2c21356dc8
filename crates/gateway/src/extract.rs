//! Extractors whose rejections use the API error envelope

use axum::extract::{FromRequest, FromRequestParts};
use fieldform_common::errors::AppError;

/// `Json` that rejects with a 400 `VALIDATION_ERROR` body
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// `Query` that rejects with a 400 `VALIDATION_ERROR` body
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);
