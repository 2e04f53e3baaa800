//! AI generation routes
//!
//! `POST /generate-diet-plan` multiplexes every asynchronous generation on
//! its `action` tag. Starting a generation debits the family wallet up
//! front; an insufficient balance answers 402 before any provider traffic.
//! The client drives polling through the check actions.

use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use hearth_ai::{AiContext, AiError, CheckOutcome, DietQuiz, ParsedDietPlan, StartInput, StartOutcome};

use crate::{
    auth::{Action, AuthContext, Module},
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub(crate) enum DietRequest {
    Start {
        #[serde(default)]
        quiz: DietQuiz,
        #[serde(default)]
        preferences: Option<String>,
    },
    Check {
        operation_id: String,
    },
    SavePlan {
        plan: ParsedDietPlan,
        #[serde(default)]
        quiz: DietQuiz,
    },
    Recipe {
        dish: String,
    },
    CheckRecipe {
        operation_id: String,
    },
    GeneratePhoto {
        prompt: String,
    },
    CheckPhoto {
        operation_id: String,
    },
    GreetingPhoto {
        occasion: String,
        #[serde(default)]
        recipient: Option<String>,
    },
    CheckGreeting {
        operation_id: String,
    },
    RecipeFromProducts {
        products: Vec<String>,
    },
    CheckProducts {
        operation_id: String,
    },
}

/// POST /generate-diet-plan
pub async fn generate(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<DietRequest>,
) -> ApiResult<Json<Value>> {
    let scope = ctx.require_family()?;
    let ai_ctx = AiContext {
        user_id: scope.user_id,
        family_id: scope.family_id,
    };

    match request {
        DietRequest::Start { quiz, preferences } => {
            ctx.require(Module::Finance, Action::Create)?;
            start(&state, ai_ctx, StartInput::DietPlan { quiz, preferences }).await
        }
        DietRequest::Recipe { dish } => {
            ctx.require(Module::Finance, Action::Create)?;
            start(&state, ai_ctx, StartInput::Recipe { dish }).await
        }
        DietRequest::GeneratePhoto { prompt } => {
            ctx.require(Module::Finance, Action::Create)?;
            start(&state, ai_ctx, StartInput::Photo { prompt }).await
        }
        DietRequest::GreetingPhoto {
            occasion,
            recipient,
        } => {
            ctx.require(Module::Finance, Action::Create)?;
            start(&state, ai_ctx, StartInput::Greeting { occasion, recipient }).await
        }
        DietRequest::RecipeFromProducts { products } => {
            ctx.require(Module::Finance, Action::Create)?;
            if products.is_empty() {
                return Err(ApiError::Validation("products must not be empty".to_string()));
            }
            start(&state, ai_ctx, StartInput::Products { products }).await
        }
        DietRequest::Check { operation_id }
        | DietRequest::CheckRecipe { operation_id }
        | DietRequest::CheckPhoto { operation_id }
        | DietRequest::CheckGreeting { operation_id }
        | DietRequest::CheckProducts { operation_id } => {
            ctx.require(Module::Finance, Action::View)?;
            check(&state, &operation_id).await
        }
        DietRequest::SavePlan { plan, quiz } => {
            ctx.require(Module::Health, Action::Create)?;
            let saved =
                hearth_ai::save_plan(&state.pool, scope.user_id, scope.family_id, &plan, &quiz)
                    .await?;
            Ok(Json(json!({
                "status": "saved",
                "plan_id": saved.plan_id,
                "duration_days": saved.duration_days,
                "start_date": saved.start_date.to_string(),
                "end_date": saved.end_date.to_string(),
                "meals": saved.meals_inserted,
            })))
        }
    }
}

async fn start(state: &AppState, ctx: AiContext, input: StartInput) -> ApiResult<Json<Value>> {
    match state.orchestrator.start(ctx, input).await? {
        StartOutcome::Started { operation_id } => Ok(Json(json!({
            "status": "started",
            "operation_id": operation_id,
        }))),
        StartOutcome::InsufficientFunds { balance, required } => {
            Err(ApiError::InsufficientFunds { balance, required })
        }
    }
}

async fn check(state: &AppState, operation_id: &str) -> ApiResult<Json<Value>> {
    let outcome = match state.orchestrator.check(operation_id).await {
        Ok(outcome) => outcome,
        // Unparseable output is reported to the caller, not surfaced as a
        // transport failure; the charge stands.
        Err(AiError::Parse(message)) => {
            return Ok(Json(json!({ "status": "error", "error": message })));
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Json(match outcome {
        CheckOutcome::Processing => json!({ "status": "processing" }),
        CheckOutcome::Failed { message } => json!({ "status": "error", "error": message }),
        CheckOutcome::DietPlan(plan) => json!({ "status": "done", "plan": plan }),
        CheckOutcome::RecipeSteps(steps) => json!({ "status": "done", "steps": steps }),
        CheckOutcome::Dishes(dishes) => json!({ "status": "done", "dishes": dishes }),
        CheckOutcome::ImageUrl(url) => json!({ "status": "done", "url": url }),
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn action_tags_cover_the_contract() {
        for (body, is_start) in [
            (json!({"action": "start"}), true),
            (json!({"action": "recipe", "dish": "борщ"}), true),
            (json!({"action": "check", "operation_id": "op"}), false),
            (json!({"action": "check_recipe", "operation_id": "op"}), false),
            (json!({"action": "generate_photo", "prompt": "кот"}), true),
            (json!({"action": "check_photo", "operation_id": "op"}), false),
            (json!({"action": "greeting_photo", "occasion": "день рождения"}), true),
            (json!({"action": "check_greeting", "operation_id": "op"}), false),
            (json!({"action": "recipe_from_products", "products": ["лук"]}), true),
            (json!({"action": "check_products", "operation_id": "op"}), false),
        ] {
            let parsed: DietRequest = serde_json::from_value(body.clone()).unwrap();
            let starts = matches!(
                parsed,
                DietRequest::Start { .. }
                    | DietRequest::Recipe { .. }
                    | DietRequest::GeneratePhoto { .. }
                    | DietRequest::GreetingPhoto { .. }
                    | DietRequest::RecipeFromProducts { .. }
            );
            assert_eq!(starts, is_start, "body: {body}");
        }
    }
}
