//! The chat page and its string catalog

use crate::core::i18n::Catalog;
use crate::core::traits::ChatService;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use di_axum::Inject;
use log::error;
use minijinja::{Environment, context};
use std::collections::HashMap;

const INDEX_TEMPLATE: &str = include_str!("../../static/index.html");

pub fn router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/i18n", get(strings))
}

async fn index(
    Inject(catalog): Inject<Catalog>,
    Inject(chat_service): Inject<dyn ChatService>,
) -> Result<Html<String>, (StatusCode, &'static str)> {
    render_index(&catalog, &chat_service.defaults()).map(Html).map_err(|e| {
        error!("failed to render index page: {e}");
        (StatusCode::INTERNAL_SERVER_ERROR, "failed to render page")
    })
}

fn render_index(
    catalog: &Catalog,
    defaults: &crate::core::traits::PromptDefaults,
) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.add_template("index.html", INDEX_TEMPLATE)?;

    env.get_template("index.html")?.render(context! {
        lang => catalog.language(),
        t => catalog.to_map(),
        defaults => defaults,
    })
}

async fn strings(Inject(catalog): Inject<Catalog>) -> Json<HashMap<&'static str, String>> {
    Json(catalog.to_map())
}
