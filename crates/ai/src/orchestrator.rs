//! AI job orchestrator
//!
//! Owns the start/check lifecycle of asynchronous generations with prepaid
//! semantics: the wallet is debited before the provider is called, an
//! insufficient balance short-circuits without any upstream traffic, and a
//! provider failure after a successful debit is not auto-refunded (refunds
//! are an admin action). The client drives polling; nothing polls server-side.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use hearth_billing::{DebitOutcome, WalletService};
use hearth_shared::AiKind;

use crate::blob::BlobStorage;
use crate::client::{ImageOperation, LlmClient, LlmMessage, LlmOperation};
use crate::error::{AiError, AiResult};
use crate::materialize::DietQuiz;
use crate::parse::{self, ParsedDietPlan};

/// Who is generating, resolved by the handler from the auth context
#[derive(Debug, Clone, Copy)]
pub struct AiContext {
    pub user_id: Uuid,
    pub family_id: Uuid,
}

/// Inputs for the supported generation kinds
#[derive(Debug, Clone)]
pub enum StartInput {
    DietPlan {
        quiz: DietQuiz,
        preferences: Option<String>,
    },
    Recipe {
        dish: String,
    },
    Photo {
        prompt: String,
    },
    Greeting {
        occasion: String,
        recipient: Option<String>,
    },
    Products {
        products: Vec<String>,
    },
}

impl StartInput {
    pub fn kind(&self) -> AiKind {
        match self {
            Self::DietPlan { .. } => AiKind::DietPlan,
            Self::Recipe { .. } => AiKind::Recipe,
            Self::Photo { .. } => AiKind::Photo,
            Self::Greeting { .. } => AiKind::Greeting,
            Self::Products { .. } => AiKind::Products,
        }
    }
}

/// Result of a start call
#[derive(Debug, Clone, Serialize)]
pub enum StartOutcome {
    Started { operation_id: String },
    InsufficientFunds { balance: i64, required: i64 },
}

/// Result of a check call
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    Processing,
    Failed { message: String },
    DietPlan(ParsedDietPlan),
    RecipeSteps(Vec<String>),
    Dishes(Vec<String>),
    ImageUrl(String),
}

#[derive(Debug, sqlx::FromRow)]
struct AiJobRow {
    kind: AiKind,
    family_id: Uuid,
}

/// AI job orchestrator
#[derive(Clone)]
pub struct AiOrchestrator {
    pool: PgPool,
    llm: LlmClient,
    blob: BlobStorage,
    wallet: WalletService,
}

impl AiOrchestrator {
    pub fn new(pool: PgPool, llm: LlmClient, blob: BlobStorage, wallet: WalletService) -> Self {
        Self {
            pool,
            llm,
            blob,
            wallet,
        }
    }

    /// Start a generation: debit first, call the provider, record the job.
    pub async fn start(&self, ctx: AiContext, input: StartInput) -> AiResult<StartOutcome> {
        let kind = input.kind();
        let price = kind.price();

        let debit = self
            .wallet
            .debit(
                ctx.family_id,
                price,
                kind.spend_reason(),
                &format!("AI generation: {kind}"),
                ctx.user_id,
            )
            .await?;

        let balance_after = match debit {
            DebitOutcome::InsufficientFunds { balance, required } => {
                return Ok(StartOutcome::InsufficientFunds { balance, required });
            }
            DebitOutcome::Debited { new_balance } => new_balance,
        };

        let operation_id = match self.start_generation(&input).await {
            Ok(id) => id,
            Err(e) => {
                // The charge stands; refunds for provider failures are issued
                // only through admin action.
                tracing::error!(
                    family_id = %ctx.family_id,
                    kind = %kind,
                    charged = price,
                    error = %e,
                    "Provider start failed after wallet debit"
                );
                return Err(e);
            }
        };

        sqlx::query(
            r#"
            INSERT INTO ai_jobs (operation_id, kind, user_id, family_id, wallet_charge_amount)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&operation_id)
        .bind(kind)
        .bind(ctx.user_id)
        .bind(ctx.family_id)
        .bind(price)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            family_id = %ctx.family_id,
            kind = %kind,
            operation_id = %operation_id,
            charged = price,
            balance_after = balance_after,
            "AI generation started"
        );

        Ok(StartOutcome::Started { operation_id })
    }

    /// Poll a generation and, when done, parse its output for the job's kind.
    pub async fn check(&self, operation_id: &str) -> AiResult<CheckOutcome> {
        let job: Option<AiJobRow> =
            sqlx::query_as("SELECT kind, family_id FROM ai_jobs WHERE operation_id = $1")
                .bind(operation_id)
                .fetch_optional(&self.pool)
                .await?;
        let job = job.ok_or_else(|| AiError::UnknownOperation(operation_id.to_string()))?;
        tracing::debug!(
            operation_id = %operation_id,
            family_id = %job.family_id,
            kind = %job.kind,
            "AI generation poll"
        );

        match job.kind {
            AiKind::Photo | AiKind::Greeting => {
                match self.llm.poll_image(operation_id).await? {
                    ImageOperation::Pending => Ok(CheckOutcome::Processing),
                    ImageOperation::Failed { message } => {
                        self.mark_job_failed(operation_id, &message).await?;
                        Ok(CheckOutcome::Failed { message })
                    }
                    ImageOperation::Done { image_base64 } => {
                        let url = self.blob.upload_base64_image(&image_base64).await?;
                        self.mark_job_done(operation_id).await?;
                        Ok(CheckOutcome::ImageUrl(url))
                    }
                }
            }
            kind => match self.llm.poll_operation(operation_id).await? {
                LlmOperation::Pending => Ok(CheckOutcome::Processing),
                LlmOperation::Failed { message } => {
                    self.mark_job_failed(operation_id, &message).await?;
                    Ok(CheckOutcome::Failed { message })
                }
                LlmOperation::Done { text } => self.parse_done(operation_id, kind, &text).await,
            },
        }
    }

    async fn parse_done(
        &self,
        operation_id: &str,
        kind: AiKind,
        text: &str,
    ) -> AiResult<CheckOutcome> {
        let outcome = match kind {
            AiKind::DietPlan => parse::parse_diet_plan(text).map(CheckOutcome::DietPlan),
            AiKind::Recipe => Ok(CheckOutcome::RecipeSteps(parse::parse_recipe_steps(text))),
            AiKind::Products => parse::parse_dishes(text).map(CheckOutcome::Dishes),
            AiKind::Photo | AiKind::Greeting => {
                Err(AiError::Internal("image kind in text path".to_string()))
            }
        };

        match outcome {
            Ok(parsed) => {
                self.mark_job_done(operation_id).await?;
                Ok(parsed)
            }
            Err(e) => {
                // Unparseable output is terminal; the wallet is not refunded.
                self.mark_job_failed(operation_id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn start_generation(&self, input: &StartInput) -> AiResult<String> {
        match input {
            StartInput::DietPlan { quiz, preferences } => {
                let messages = diet_plan_messages(quiz, preferences.as_deref());
                self.llm
                    .start_completion("yandexgpt/latest", 0.3, 8000, &messages)
                    .await
            }
            StartInput::Recipe { dish } => {
                let messages = vec![
                    LlmMessage::system(
                        "Ты кулинарный помощник. Отвечай только JSON-массивом строк, \
                         каждая строка — один шаг рецепта.",
                    ),
                    LlmMessage::user(format!("Напиши пошаговый рецепт блюда: {dish}")),
                ];
                self.llm
                    .start_completion("yandexgpt-lite/latest", 0.4, 2000, &messages)
                    .await
            }
            StartInput::Products { products } => {
                let messages = vec![
                    LlmMessage::system(
                        "Ты кулинарный помощник. Отвечай только JSON-объектом вида \
                         {\"dishes\": [\"...\"]}.",
                    ),
                    LlmMessage::user(format!(
                        "Какие блюда можно приготовить из продуктов: {}?",
                        products.join(", ")
                    )),
                ];
                self.llm
                    .start_completion("yandexgpt-lite/latest", 0.5, 2000, &messages)
                    .await
            }
            StartInput::Photo { prompt } => self.llm.start_image(prompt).await,
            StartInput::Greeting { occasion, recipient } => {
                let prompt = match recipient {
                    Some(name) => format!("Праздничная открытка: {occasion} для {name}"),
                    None => format!("Праздничная открытка: {occasion}"),
                };
                self.llm.start_image(&prompt).await
            }
        }
    }

    async fn mark_job_done(&self, operation_id: &str) -> AiResult<()> {
        sqlx::query(
            "UPDATE ai_jobs SET status = 'done', completed_at = NOW() WHERE operation_id = $1 AND status = 'started'",
        )
        .bind(operation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_job_failed(&self, operation_id: &str, message: &str) -> AiResult<()> {
        sqlx::query(
            "UPDATE ai_jobs SET status = 'error', error = $2, completed_at = NOW() WHERE operation_id = $1 AND status = 'started'",
        )
        .bind(operation_id)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Prompt for the diet-plan generation. The schema named here is the one the
/// parser and truncation recovery expect, eleven fields per meal.
fn diet_plan_messages(quiz: &DietQuiz, preferences: Option<&str>) -> Vec<LlmMessage> {
    let mut request = String::from("Составь план питания на 7 дней.");
    if let Some(weight) = quiz.current_weight_kg {
        request.push_str(&format!(" Текущий вес: {weight} кг."));
    }
    if let Some(loss) = quiz.target_weight_loss_kg {
        request.push_str(&format!(" Цель: сбросить {loss} кг."));
    }
    if let Some(plan_type) = &quiz.plan_type {
        request.push_str(&format!(" Тип плана: {plan_type}."));
    }
    if let Some(prefs) = preferences {
        request.push_str(&format!(" Предпочтения: {prefs}."));
    }

    vec![
        LlmMessage::system(
            "Ты диетолог. Отвечай только JSON-объектом вида \
             {\"plan_type\": \"...\", \"daily_calories\": N, \"daily_protein_g\": N, \
             \"daily_fat_g\": N, \"daily_carbs_g\": N, \"days\": [{\"day\": \"Понедельник\", \
             \"meals\": [{\"meal_type\": \"breakfast\", \"time\": \"08:00\", \"title\": \"...\", \
             \"description\": \"...\", \"calories\": N, \"protein_g\": N, \"fat_g\": N, \
             \"carbs_g\": N, \"portion_g\": N, \"recipe\": \"...\", \
             \"ingredients\": [\"Название — количество единица\"]}]}]}. \
             Поля каждого блюда строго в этом порядке, без лишнего текста.",
        ),
        LlmMessage::user(request),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_input_maps_to_kind_and_price() {
        let input = StartInput::Recipe {
            dish: "борщ".to_string(),
        };
        assert_eq!(input.kind(), AiKind::Recipe);
        assert_eq!(input.kind().price(), 2);

        let input = StartInput::DietPlan {
            quiz: DietQuiz::default(),
            preferences: None,
        };
        assert_eq!(input.kind(), AiKind::DietPlan);
        assert_eq!(input.kind().price(), 17);
    }

    #[test]
    fn diet_prompt_mentions_quiz_fields() {
        let quiz = DietQuiz {
            plan_type: Some("weight_loss".to_string()),
            current_weight_kg: Some(82.0),
            target_weight_loss_kg: Some(5.0),
        };
        let messages = diet_plan_messages(&quiz, Some("без лактозы"));
        assert_eq!(messages.len(), 2);
        assert!(messages[1].text.contains("82"));
        assert!(messages[1].text.contains("без лактозы"));
    }
}
