//! Common types used across Hearth

use serde::{Deserialize, Serialize};

// =============================================================================
// Subscription plans
// =============================================================================

/// Subscription plan identifier
///
/// The catalog is immutable within a release; prices and periods live on the
/// variant accessors below, never in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanId {
    AiAssistant,
    Full,
}

impl PlanId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiAssistant => "ai_assistant",
            Self::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ai_assistant" => Some(Self::AiAssistant),
            "full" => Some(Self::Full),
            _ => None,
        }
    }

    /// Human-readable plan name shown in payment descriptions
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::AiAssistant => "AI assistant",
            Self::Full => "Full access",
        }
    }

    /// Plan price in minor currency units (kopecks)
    pub fn price_minor(&self) -> i64 {
        match self {
            Self::AiAssistant => 20_000,
            Self::Full => 50_000,
        }
    }

    /// Subscription period in calendar days
    pub fn period_days(&self) -> i64 {
        match self {
            Self::AiAssistant => 30,
            Self::Full => 30,
        }
    }

    /// Features unlocked by this plan
    pub fn feature_set(&self) -> &'static [&'static str] {
        match self {
            Self::AiAssistant => &["ai_recipes", "ai_diet_plans", "ai_photos"],
            Self::Full => &[
                "ai_recipes",
                "ai_diet_plans",
                "ai_photos",
                "extended_storage",
                "priority_support",
            ],
        }
    }

    /// The only legal upgrade edge in the catalog is ai_assistant -> full.
    pub fn upgrade_target(&self) -> Option<PlanId> {
        match self {
            Self::AiAssistant => Some(Self::Full),
            Self::Full => None,
        }
    }

    /// Whether `self -> to` is a declared upgrade pair
    pub fn can_upgrade_to(&self, to: PlanId) -> bool {
        self.upgrade_target() == Some(to)
    }

    pub fn all() -> &'static [PlanId] {
        &[Self::AiAssistant, Self::Full]
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Upgraded,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Upgraded => "upgraded",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Payments
// =============================================================================

/// Payment record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
        }
    }
}

/// What a payment is for, carried through provider metadata and dispatched on
/// webhook activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentAction {
    Create,
    Extend,
    Upgrade,
    Topup,
}

impl PaymentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Extend => "extend",
            Self::Upgrade => "upgrade",
            Self::Topup => "topup",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "extend" => Some(Self::Extend),
            "upgrade" => Some(Self::Upgrade),
            "topup" => Some(Self::Topup),
            _ => None,
        }
    }
}

// =============================================================================
// Wallet
// =============================================================================

/// Wallet transaction direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TxnKind {
    Spend,
    Topup,
    Refund,
}

impl TxnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spend => "spend",
            Self::Topup => "topup",
            Self::Refund => "refund",
        }
    }

    /// Sign applied when summing the transaction log back into a balance
    pub fn sign(&self) -> i64 {
        match self {
            Self::Spend => -1,
            Self::Topup | Self::Refund => 1,
        }
    }
}

/// Enumerated reason tags for wallet transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SpendReason {
    AiDietPlan,
    AiRecipe,
    AiPhoto,
    AiGreeting,
    AiRecipeFromProducts,
    AiOther,
    TopupDonation,
    AdminRefund,
}

impl SpendReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiDietPlan => "ai_diet_plan",
            Self::AiRecipe => "ai_recipe",
            Self::AiPhoto => "ai_photo",
            Self::AiGreeting => "ai_greeting",
            Self::AiRecipeFromProducts => "ai_recipe_from_products",
            Self::AiOther => "ai_other",
            Self::TopupDonation => "topup_donation",
            Self::AdminRefund => "admin_refund",
        }
    }
}

impl std::fmt::Display for SpendReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// AI generations
// =============================================================================

/// Kind of asynchronous AI generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AiKind {
    DietPlan,
    Recipe,
    Photo,
    Greeting,
    Products,
}

impl AiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DietPlan => "diet_plan",
            Self::Recipe => "recipe",
            Self::Photo => "photo",
            Self::Greeting => "greeting",
            Self::Products => "products",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "diet_plan" => Some(Self::DietPlan),
            "recipe" => Some(Self::Recipe),
            "photo" => Some(Self::Photo),
            "greeting" => Some(Self::Greeting),
            "products" => Some(Self::Products),
            _ => None,
        }
    }

    /// Wallet reason tag written on debit
    pub fn spend_reason(&self) -> SpendReason {
        match self {
            Self::DietPlan => SpendReason::AiDietPlan,
            Self::Recipe => SpendReason::AiRecipe,
            Self::Photo => SpendReason::AiPhoto,
            Self::Greeting => SpendReason::AiGreeting,
            Self::Products => SpendReason::AiRecipeFromProducts,
        }
    }

    /// Prepaid cost in whole currency units
    ///
    /// Pricing is configuration: new kinds extend this table, the wallet
    /// engine itself is agnostic.
    pub fn price(&self) -> i64 {
        match self {
            Self::DietPlan => 17,
            Self::Recipe => 2,
            Self::Photo => 7,
            Self::Greeting => 7,
            Self::Products => 5,
        }
    }
}

impl std::fmt::Display for AiKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Family membership
// =============================================================================

/// Coarse capability label assigned to a family member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccessRole {
    Admin,
    Parent,
    Guardian,
    Viewer,
    Child,
}

impl AccessRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Parent => "parent",
            Self::Guardian => "guardian",
            Self::Viewer => "viewer",
            Self::Child => "child",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "parent" => Some(Self::Parent),
            "guardian" => Some(Self::Guardian),
            "viewer" => Some(Self::Viewer),
            "child" => Some(Self::Child),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccessRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn plan_catalog_round_trips() {
        for plan in PlanId::all() {
            assert_eq!(PlanId::parse(plan.as_str()), Some(*plan));
            assert!(plan.price_minor() > 0);
            assert!(plan.period_days() > 0);
        }
    }

    #[test]
    fn upgrade_pairs_are_exactly_ai_assistant_to_full() {
        assert!(PlanId::AiAssistant.can_upgrade_to(PlanId::Full));
        assert!(!PlanId::Full.can_upgrade_to(PlanId::AiAssistant));
        assert!(!PlanId::AiAssistant.can_upgrade_to(PlanId::AiAssistant));
        assert_eq!(PlanId::Full.upgrade_target(), None);
    }

    #[test]
    fn spend_prices_match_pricing_table() {
        assert_eq!(AiKind::DietPlan.price(), 17);
        assert_eq!(AiKind::Recipe.price(), 2);
        assert_eq!(AiKind::Photo.price(), 7);
        assert_eq!(AiKind::Greeting.price(), 7);
        assert_eq!(AiKind::Products.price(), 5);
    }

    #[test]
    fn txn_kind_signs() {
        assert_eq!(TxnKind::Spend.sign(), -1);
        assert_eq!(TxnKind::Topup.sign(), 1);
        assert_eq!(TxnKind::Refund.sign(), 1);
    }

    #[test]
    fn ai_kind_serde_uses_snake_case() {
        let json = serde_json::to_string(&AiKind::DietPlan).unwrap();
        assert_eq!(json, "\"diet_plan\"");
        let parsed: AiKind = serde_json::from_str("\"recipe\"").unwrap();
        assert_eq!(parsed, AiKind::Recipe);
    }
}
