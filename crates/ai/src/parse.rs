//! Parsing of LLM generation output
//!
//! Model output is free text that usually contains JSON. Extraction is
//! tolerant: trailing commas are repaired, and a response cut mid-stream goes
//! through truncation recovery, which salvages every fully-formed meal block
//! and drops days left with no meals.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AiError, AiResult};

/// A diet plan as produced by the model, before materialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDietPlan {
    #[serde(default)]
    pub plan_type: Option<String>,
    pub daily_calories: i32,
    #[serde(default)]
    pub daily_protein_g: Option<i32>,
    #[serde(default)]
    pub daily_fat_g: Option<i32>,
    #[serde(default)]
    pub daily_carbs_g: Option<i32>,
    pub days: Vec<ParsedDay>,
}

/// One labelled day of the plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDay {
    pub day: String,
    pub meals: Vec<ParsedMeal>,
}

/// One meal block; the model is prompted for exactly these eleven fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedMeal {
    pub meal_type: String,
    #[serde(default)]
    pub time: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub calories: i32,
    pub protein_g: i32,
    pub fat_g: i32,
    pub carbs_g: i32,
    #[serde(default)]
    pub portion_g: Option<i32>,
    #[serde(default)]
    pub recipe: Option<String>,
    #[serde(default)]
    pub ingredients: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DishesEnvelope {
    dishes: Vec<String>,
}

/// Slice the JSON object between the first `{` and the last `}` of the text
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Slice the JSON array between the first `[` and the last `]` of the text
pub fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Strip commas hanging before a closing brace or bracket
pub fn repair_trailing_commas(json: &str) -> String {
    trailing_comma_re()
        .replace_all(json, "$1")
        .into_owned()
}

/// Parse a diet-plan generation.
///
/// Strict JSON first, then trailing-comma repair, then truncation recovery.
/// A response no recovery pass can salvage fails with a parse error; the
/// wallet charge stands either way.
pub fn parse_diet_plan(text: &str) -> AiResult<ParsedDietPlan> {
    let object = extract_json_object(text)
        .ok_or_else(|| AiError::Parse("no JSON object in response".to_string()))?;

    if let Ok(plan) = serde_json::from_str::<ParsedDietPlan>(object) {
        return finish_plan(plan);
    }

    let repaired = repair_trailing_commas(object);
    if let Ok(plan) = serde_json::from_str::<ParsedDietPlan>(&repaired) {
        return finish_plan(plan);
    }

    let recovered = recover_truncated(text);
    if recovered.days.is_empty() {
        return Err(AiError::Parse(
            "failed to parse diet plan response".to_string(),
        ));
    }
    tracing::warn!(
        days = recovered.days.len(),
        "Diet plan response recovered from truncation"
    );
    Ok(recovered)
}

fn finish_plan(plan: ParsedDietPlan) -> AiResult<ParsedDietPlan> {
    if plan.days.is_empty() {
        return Err(AiError::Parse("diet plan has no days".to_string()));
    }
    Ok(plan)
}

/// Parse recipe steps: a JSON string array, falling back to splitting lines
/// and trimming `1.` / `-` / `•` bullets when the model answered in prose.
pub fn parse_recipe_steps(text: &str) -> Vec<String> {
    if let Some(array) = extract_json_array(text) {
        if let Ok(steps) = serde_json::from_str::<Vec<String>>(array) {
            return steps.into_iter().filter(|s| !s.trim().is_empty()).collect();
        }
        let repaired = repair_trailing_commas(array);
        if let Ok(steps) = serde_json::from_str::<Vec<String>>(&repaired) {
            return steps.into_iter().filter(|s| !s.trim().is_empty()).collect();
        }
    }

    text.lines()
        .map(|line| bullet_re().replace(line.trim(), "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Parse dish suggestions: `{"dishes": [...]}`
pub fn parse_dishes(text: &str) -> AiResult<Vec<String>> {
    let object = extract_json_object(text)
        .ok_or_else(|| AiError::Parse("no JSON object in response".to_string()))?;

    let parsed: Result<DishesEnvelope, _> = serde_json::from_str(object);
    let envelope = match parsed {
        Ok(e) => e,
        Err(_) => serde_json::from_str(&repair_trailing_commas(object))
            .map_err(|e| AiError::Parse(format!("dishes: {e}")))?,
    };
    Ok(envelope.dishes)
}

// =============================================================================
// Truncation recovery
// =============================================================================

/// Salvage a diet plan from a response cut mid-stream.
///
/// Pulls the daily_* numerics out of the raw text, then scans each day
/// segment for meal blocks. Only blocks carrying all eleven fields count; a
/// day with zero complete meals is discarded.
pub fn recover_truncated(text: &str) -> ParsedDietPlan {
    let daily_calories = capture_i32(text, daily_calories_re()).unwrap_or(0);
    let daily_protein_g = capture_i32(text, daily_protein_re());
    let daily_fat_g = capture_i32(text, daily_fat_re());
    let daily_carbs_g = capture_i32(text, daily_carbs_re());
    let plan_type = plan_type_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let day_positions: Vec<(usize, String)> = day_label_re()
        .captures_iter(text)
        .filter_map(|c| {
            let m = c.get(0)?;
            let label = c.get(1)?.as_str().to_string();
            Some((m.start(), label))
        })
        .collect();

    let mut days = Vec::new();
    for (i, (start, label)) in day_positions.iter().enumerate() {
        let end = day_positions
            .get(i + 1)
            .map(|(next, _)| *next)
            .unwrap_or(text.len());
        let segment = &text[*start..end];

        let meals: Vec<ParsedMeal> = meal_block_re()
            .captures_iter(segment)
            .filter_map(|c| meal_from_captures(&c))
            .collect();

        if !meals.is_empty() {
            days.push(ParsedDay {
                day: label.clone(),
                meals,
            });
        }
    }

    ParsedDietPlan {
        plan_type,
        daily_calories,
        daily_protein_g,
        daily_fat_g,
        daily_carbs_g,
        days,
    }
}

fn meal_from_captures(c: &regex::Captures<'_>) -> Option<ParsedMeal> {
    Some(ParsedMeal {
        meal_type: c.get(1)?.as_str().to_string(),
        time: Some(c.get(2)?.as_str().to_string()),
        title: c.get(3)?.as_str().to_string(),
        description: Some(c.get(4)?.as_str().to_string()),
        calories: c.get(5)?.as_str().parse().ok()?,
        protein_g: c.get(6)?.as_str().parse().ok()?,
        fat_g: c.get(7)?.as_str().parse().ok()?,
        carbs_g: c.get(8)?.as_str().parse().ok()?,
        portion_g: c.get(9)?.as_str().parse().ok(),
        recipe: Some(c.get(10)?.as_str().to_string()),
        ingredients: quoted_string_re()
            .captures_iter(c.get(11)?.as_str())
            .filter_map(|q| q.get(1).map(|m| m.as_str().to_string()))
            .collect(),
    })
}

fn capture_i32(text: &str, re: &Regex) -> Option<i32> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

// Compiled-once patterns. All literals; a failure to compile is a programming
// error caught by the parse tests.

#[allow(clippy::expect_used)]
pub(crate) fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("invalid built-in regex")
}

fn trailing_comma_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r",\s*([}\]])"))
}

fn bullet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r"^(?:\d+[.)]\s*|[-•]\s*)"))
}

fn daily_calories_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r#""daily_calories"\s*:\s*(\d+)"#))
}

fn daily_protein_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r#""daily_protein_g"\s*:\s*(\d+)"#))
}

fn daily_fat_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r#""daily_fat_g"\s*:\s*(\d+)"#))
}

fn daily_carbs_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r#""daily_carbs_g"\s*:\s*(\d+)"#))
}

fn plan_type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r#""plan_type"\s*:\s*"([^"]+)""#))
}

fn day_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r#""day"\s*:\s*"([^"]+)""#))
}

fn quoted_string_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r#""([^"]*)""#))
}

/// A fully-formed meal block: all eleven fields in prompt order. Anything
/// the cut-off left incomplete fails the match and is dropped.
fn meal_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        compile(
            r#"(?s)\{\s*"meal_type"\s*:\s*"([^"]*)"\s*,\s*"time"\s*:\s*"([^"]*)"\s*,\s*"title"\s*:\s*"([^"]*)"\s*,\s*"description"\s*:\s*"([^"]*)"\s*,\s*"calories"\s*:\s*(\d+)\s*,\s*"protein_g"\s*:\s*(\d+)\s*,\s*"fat_g"\s*:\s*(\d+)\s*,\s*"carbs_g"\s*:\s*(\d+)\s*,\s*"portion_g"\s*:\s*(\d+)\s*,\s*"recipe"\s*:\s*"([^"]*)"\s*,\s*"ingredients"\s*:\s*\[([^\]]*)\]\s*\}"#,
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn meal_json(title: &str) -> String {
        format!(
            r#"{{"meal_type": "breakfast", "time": "08:00", "title": "{title}",
                "description": "Simple start", "calories": 420, "protein_g": 25,
                "fat_g": 12, "carbs_g": 55, "portion_g": 300,
                "recipe": "Mix and serve",
                "ingredients": ["Овсянка — 60 г", "Молоко — 200 мл"]}}"#
        )
    }

    fn plan_json() -> String {
        format!(
            r#"Вот ваш план:
            {{"plan_type": "weight_loss", "daily_calories": 1800,
              "daily_protein_g": 120, "daily_fat_g": 60, "daily_carbs_g": 180,
              "days": [
                {{"day": "Понедельник", "meals": [{meal}]}},
                {{"day": "Вторник", "meals": [{meal}]}}
              ]}}"#,
            meal = meal_json("Овсянка")
        )
    }

    #[test]
    fn well_formed_plan_parses() {
        let plan = parse_diet_plan(&plan_json()).unwrap();
        assert_eq!(plan.daily_calories, 1800);
        assert_eq!(plan.days.len(), 2);
        assert_eq!(plan.days[0].day, "Понедельник");
        assert_eq!(plan.days[0].meals[0].ingredients.len(), 2);
    }

    #[test]
    fn trailing_comma_is_repaired() {
        let text = r#"{"plan_type": "balanced", "daily_calories": 2000,
            "days": [{"day": "Понедельник", "meals": [
                {"meal_type": "lunch", "title": "Суп", "calories": 350,
                 "protein_g": 20, "fat_g": 10, "carbs_g": 40,}
            ],}],}"#;
        let plan = parse_diet_plan(text).unwrap();
        assert_eq!(plan.days.len(), 1);
        assert_eq!(plan.days[0].meals[0].title, "Суп");
    }

    #[test]
    fn truncated_response_recovers_complete_meals_only() {
        // Second day is cut off mid-meal: the complete first-day meal
        // survives, the partial block and its day are dropped.
        let text = format!(
            r#"{{"daily_calories": 1900, "daily_protein_g": 110,
                "daily_fat_g": 55, "daily_carbs_g": 170,
                "days": [
                  {{"day": "Понедельник", "meals": [{meal}]}},
                  {{"day": "Вторник", "meals": [
                    {{"meal_type": "breakfast", "time": "08:00", "title": "Каша",
                      "description": "Неоконченное", "calories": 400, "protei"#,
            meal = meal_json("Омлет")
        );

        let plan = parse_diet_plan(&text).unwrap();
        assert_eq!(plan.daily_calories, 1900);
        assert_eq!(plan.daily_protein_g, Some(110));
        assert_eq!(plan.days.len(), 1);
        assert_eq!(plan.days[0].day, "Понедельник");
        assert_eq!(plan.days[0].meals.len(), 1);
        assert_eq!(plan.days[0].meals[0].title, "Омлет");
    }

    #[test]
    fn unrecoverable_response_is_a_parse_error() {
        let err = parse_diet_plan("{\"days\": [").unwrap_err();
        assert!(matches!(err, AiError::Parse(_)));
        assert!(parse_diet_plan("no json here at all").is_err());
    }

    #[test]
    fn recipe_steps_prefer_json_array() {
        let text = r#"Конечно! ["Нарежьте овощи", "Обжарьте лук", "Тушите 20 минут"]"#;
        let steps = parse_recipe_steps(text);
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0], "Нарежьте овощи");
    }

    #[test]
    fn recipe_steps_fall_back_to_bullet_lines() {
        let text = "1. Нарежьте овощи\n2) Обжарьте лук\n- Добавьте соль\n• Подавайте горячим\n\n";
        let steps = parse_recipe_steps(text);
        assert_eq!(
            steps,
            vec![
                "Нарежьте овощи",
                "Обжарьте лук",
                "Добавьте соль",
                "Подавайте горячим"
            ]
        );
    }

    #[test]
    fn dishes_envelope_parses() {
        let text = r#"{"dishes": ["Борщ", "Плов", "Салат"]}"#;
        assert_eq!(parse_dishes(text).unwrap().len(), 3);
    }

    #[test]
    fn materialized_plan_round_trips_through_json() {
        let plan = parse_diet_plan(&plan_json()).unwrap();
        let serialized = serde_json::to_string(&plan).unwrap();
        let reparsed: ParsedDietPlan = serde_json::from_str(&serialized).unwrap();
        assert_eq!(reparsed.days.len(), plan.days.len());
        assert_eq!(reparsed.days[1].meals[0].title, plan.days[1].meals[0].title);
        assert_eq!(reparsed.daily_calories, plan.daily_calories);
    }
}
