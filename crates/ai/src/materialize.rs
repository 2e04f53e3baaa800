//! Diet plan materialization
//!
//! Turns a parsed plan into relational rows in one transaction: the prior
//! active plan completes, days map to sequential day numbers in order of
//! first occurrence, and ingredient strings break into (name, amount, unit).

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::{Date, Duration, OffsetDateTime, Time};
use uuid::Uuid;

use crate::error::{AiError, AiResult};
use crate::parse::{ParsedDietPlan, ParsedMeal};

/// Quiz answers that accompany a diet plan generation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DietQuiz {
    #[serde(default)]
    pub plan_type: Option<String>,
    #[serde(default)]
    pub current_weight_kg: Option<f64>,
    #[serde(default)]
    pub target_weight_loss_kg: Option<f64>,
}

/// Materialized plan summary returned to the client
#[derive(Debug, Clone, Serialize)]
pub struct SavedPlan {
    pub plan_id: Uuid,
    pub duration_days: i32,
    pub start_date: Date,
    pub end_date: Date,
    pub meals_inserted: usize,
}

/// Parsed `name — amount unit` ingredient
#[derive(Debug, Clone, PartialEq)]
pub struct Ingredient {
    pub name: String,
    pub amount: Option<f64>,
    pub unit: Option<String>,
}

/// Materialize a parsed plan for a user. Any existing active plan completes
/// in the same transaction; at most one plan stays active per user.
pub async fn save_plan(
    pool: &PgPool,
    user_id: Uuid,
    family_id: Uuid,
    plan: &ParsedDietPlan,
    quiz: &DietQuiz,
) -> AiResult<SavedPlan> {
    let start_date = OffsetDateTime::now_utc().date();
    let duration_days = if plan.days.is_empty() {
        7
    } else {
        distinct_day_count(plan)
    };
    let end_date = start_date + Duration::days(i64::from(duration_days) - 1);

    let plan_type = quiz
        .plan_type
        .clone()
        .or_else(|| plan.plan_type.clone())
        .unwrap_or_else(|| "balanced".to_string());

    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE diet_plans SET status = 'completed' WHERE user_id = $1 AND status = 'active'",
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    let plan_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO diet_plans
            (user_id, family_id, plan_type, start_date, end_date, duration_days,
             target_weight_loss_kg, target_calories_daily, target_protein_g,
             target_fat_g, target_carbs_g, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'active')
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(family_id)
    .bind(&plan_type)
    .bind(start_date)
    .bind(end_date)
    .bind(duration_days)
    .bind(quiz.target_weight_loss_kg)
    .bind(plan.daily_calories)
    .bind(plan.daily_protein_g)
    .bind(plan.daily_fat_g)
    .bind(plan.daily_carbs_g)
    .fetch_one(&mut *tx)
    .await?;

    let mut meals_inserted = 0usize;
    let mut day_numbers: Vec<(String, i32)> = Vec::new();

    for day in &plan.days {
        let day_number = day_number_for(&mut day_numbers, &day.day);
        let meal_date = start_date + Duration::days(i64::from(day_number) - 1);

        for meal in &day.meals {
            let meal_time = meal_time_for(meal);
            let meal_id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO diet_meals
                    (plan_id, day_number, meal_date, meal_type, meal_time, title,
                     description, calories, protein_g, fat_g, carbs_g)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                RETURNING id
                "#,
            )
            .bind(plan_id)
            .bind(day_number)
            .bind(meal_date)
            .bind(meal.meal_type.to_lowercase())
            .bind(meal_time)
            .bind(&meal.title)
            .bind(meal.description.as_deref())
            .bind(meal.calories)
            .bind(meal.protein_g)
            .bind(meal.fat_g)
            .bind(meal.carbs_g)
            .fetch_one(&mut *tx)
            .await?;
            meals_inserted += 1;

            for raw in &meal.ingredients {
                let ingredient = parse_ingredient(raw);
                sqlx::query(
                    r#"
                    INSERT INTO diet_meal_ingredients (meal_id, ingredient_name, amount, unit)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(meal_id)
                .bind(&ingredient.name)
                .bind(ingredient.amount)
                .bind(ingredient.unit.as_deref())
                .execute(&mut *tx)
                .await?;
            }
        }
    }

    if let Some(weight) = quiz.current_weight_kg {
        sqlx::query(
            r#"
            INSERT INTO diet_weight_log (user_id, family_id, weight_kg, logged_on)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id)
        .bind(family_id)
        .bind(weight)
        .bind(start_date)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(
        user_id = %user_id,
        plan_id = %plan_id,
        duration_days = duration_days,
        meals = meals_inserted,
        "Diet plan materialized"
    );

    Ok(SavedPlan {
        plan_id,
        duration_days,
        start_date,
        end_date,
        meals_inserted,
    })
}

/// Count distinct day labels, preserving nothing but cardinality
fn distinct_day_count(plan: &ParsedDietPlan) -> i32 {
    let mut seen: Vec<&str> = Vec::new();
    for day in &plan.days {
        if !seen.contains(&day.day.as_str()) {
            seen.push(&day.day);
        }
    }
    seen.len() as i32
}

/// Sequential day number for a label, assigned in order of first occurrence
fn day_number_for(assigned: &mut Vec<(String, i32)>, label: &str) -> i32 {
    if let Some((_, n)) = assigned.iter().find(|(l, _)| l == label) {
        return *n;
    }
    let next = assigned.len() as i32 + 1;
    assigned.push((label.to_string(), next));
    next
}

/// Meal time: the model's value when it parses, inferred from the meal type
/// otherwise (breakfast 08:00, lunch 13:00, dinner 19:00, snack 16:00)
fn meal_time_for(meal: &ParsedMeal) -> Time {
    if let Some(raw) = &meal.time {
        if let Ok(t) = Time::parse(raw, time_format()) {
            return t;
        }
    }
    default_meal_time(&meal.meal_type)
}

fn default_meal_time(meal_type: &str) -> Time {
    match meal_type.to_lowercase().as_str() {
        "breakfast" => Time::from_hms(8, 0, 0),
        "lunch" => Time::from_hms(13, 0, 0),
        "dinner" => Time::from_hms(19, 0, 0),
        _ => Time::from_hms(16, 0, 0),
    }
    .unwrap_or(Time::MIDNIGHT)
}

fn time_format() -> &'static [time::format_description::FormatItem<'static>] {
    time::macros::format_description!("[hour]:[minute]")
}

/// Split an ingredient string on the `name — amount unit` pattern.
/// Separators `—`, `-`, `–`, `:` are all accepted; a string without a
/// numeric amount keeps only its name.
pub fn parse_ingredient(raw: &str) -> Ingredient {
    if let Some(captures) = ingredient_re().captures(raw) {
        let name = captures
            .name("name")
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        let amount = captures
            .name("amount")
            .and_then(|m| m.as_str().replace(',', ".").parse::<f64>().ok());
        let unit = captures
            .name("unit")
            .map(|m| m.as_str().trim().to_string())
            .filter(|u| !u.is_empty());
        if !name.is_empty() {
            return Ingredient { name, amount, unit };
        }
    }
    Ingredient {
        name: raw.trim().to_string(),
        amount: None,
        unit: None,
    }
}

fn ingredient_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        crate::parse::compile(
            r"^\s*(?P<name>.+?)\s*[—–:-]\s*(?P<amount>\d+(?:[.,]\d+)?)\s*(?P<unit>.*)\s*$",
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::parse::ParsedDay;

    fn meal(meal_type: &str, time: Option<&str>) -> ParsedMeal {
        ParsedMeal {
            meal_type: meal_type.to_string(),
            time: time.map(|t| t.to_string()),
            title: "Блюдо".to_string(),
            description: None,
            calories: 400,
            protein_g: 20,
            fat_g: 10,
            carbs_g: 50,
            portion_g: None,
            recipe: None,
            ingredients: vec![],
        }
    }

    #[test]
    fn ingredient_splits_on_em_dash() {
        assert_eq!(
            parse_ingredient("Овсянка — 60 г"),
            Ingredient {
                name: "Овсянка".to_string(),
                amount: Some(60.0),
                unit: Some("г".to_string()),
            }
        );
    }

    #[test]
    fn ingredient_accepts_all_separators_and_decimal_comma() {
        for raw in ["Молоко - 200 мл", "Молоко – 200 мл", "Молоко: 200 мл"] {
            let parsed = parse_ingredient(raw);
            assert_eq!(parsed.name, "Молоко");
            assert_eq!(parsed.amount, Some(200.0));
            assert_eq!(parsed.unit.as_deref(), Some("мл"));
        }
        let parsed = parse_ingredient("Соль — 0,5 ч.л.");
        assert_eq!(parsed.amount, Some(0.5));
        assert_eq!(parsed.unit.as_deref(), Some("ч.л."));
    }

    #[test]
    fn ingredient_without_amount_keeps_name_only() {
        let parsed = parse_ingredient("Соль по вкусу");
        assert_eq!(parsed.name, "Соль по вкусу");
        assert_eq!(parsed.amount, None);
        assert_eq!(parsed.unit, None);
    }

    #[test]
    fn meal_time_prefers_model_value_then_infers() {
        assert_eq!(
            meal_time_for(&meal("dinner", Some("18:30"))),
            Time::from_hms(18, 30, 0).unwrap()
        );
        assert_eq!(
            meal_time_for(&meal("breakfast", None)),
            Time::from_hms(8, 0, 0).unwrap()
        );
        assert_eq!(
            meal_time_for(&meal("lunch", Some("not a time"))),
            Time::from_hms(13, 0, 0).unwrap()
        );
        assert_eq!(
            meal_time_for(&meal("snack", None)),
            Time::from_hms(16, 0, 0).unwrap()
        );
    }

    #[test]
    fn day_numbers_follow_first_occurrence_order() {
        let mut assigned = Vec::new();
        assert_eq!(day_number_for(&mut assigned, "Среда"), 1);
        assert_eq!(day_number_for(&mut assigned, "Понедельник"), 2);
        assert_eq!(day_number_for(&mut assigned, "Среда"), 1);
        assert_eq!(day_number_for(&mut assigned, "Пятница"), 3);
    }

    #[test]
    fn distinct_days_count_duplicates_once() {
        let plan = ParsedDietPlan {
            plan_type: None,
            daily_calories: 1800,
            daily_protein_g: None,
            daily_fat_g: None,
            daily_carbs_g: None,
            days: vec![
                ParsedDay {
                    day: "Понедельник".to_string(),
                    meals: vec![meal("breakfast", None)],
                },
                ParsedDay {
                    day: "Вторник".to_string(),
                    meals: vec![meal("lunch", None)],
                },
                ParsedDay {
                    day: "Понедельник".to_string(),
                    meals: vec![meal("dinner", None)],
                },
            ],
        };
        assert_eq!(distinct_day_count(&plan), 2);
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn save_plan_completes_prior_active_plan() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = hearth_shared::db::create_pool(&url).await.unwrap();

        let user_id: Uuid =
            sqlx::query_scalar("INSERT INTO users (email) VALUES ($1) RETURNING id")
                .bind(format!("diet-{}@test.local", Uuid::new_v4()))
                .fetch_one(&pool)
                .await
                .unwrap();
        let family_id: Uuid =
            sqlx::query_scalar("INSERT INTO families (name) VALUES ('Diet family') RETURNING id")
                .fetch_one(&pool)
                .await
                .unwrap();

        let plan = ParsedDietPlan {
            plan_type: Some("weight_loss".to_string()),
            daily_calories: 1800,
            daily_protein_g: Some(120),
            daily_fat_g: Some(60),
            daily_carbs_g: Some(180),
            days: vec![ParsedDay {
                day: "Понедельник".to_string(),
                meals: vec![meal("breakfast", Some("08:00"))],
            }],
        };
        let quiz = DietQuiz {
            current_weight_kg: Some(82.5),
            ..Default::default()
        };

        let first = save_plan(&pool, user_id, family_id, &plan, &quiz).await.unwrap();
        let second = save_plan(&pool, user_id, family_id, &plan, &quiz).await.unwrap();
        assert_ne!(first.plan_id, second.plan_id);

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM diet_plans WHERE user_id = $1 AND status = 'active'",
        )
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(active, 1);

        let weights: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM diet_weight_log WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(weights, 2);
    }
}
