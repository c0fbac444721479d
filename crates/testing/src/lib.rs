//! Fixture record types shared by the lodestone test suites.
//!
//! Each type carries the descriptor table and index set a code generator
//! would emit for it. The index mix is chosen to exercise every maintainer
//! kind at least once.

use serde::{Deserialize, Serialize};

use lodestone_core::{
    FieldDescriptor, GraphDirection, IndexDescriptor, IndexKind, IndexState, Record, Value,
    DEFAULT_DISTINCT_PRECISION,
};

/// A user with a unique email, used by uniqueness and query tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub region: String,
    pub score: i64,
    pub status: String,
    pub tags: Vec<String>,
}

impl User {
    pub fn new(
        id: impl Into<String>,
        email: impl Into<String>,
        region: impl Into<String>,
        score: i64,
        status: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            region: region.into(),
            score,
            status: status.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|tag| tag.to_string()).collect();
        self
    }
}

fn user_id(user: &User) -> Value {
    Value::from(user.id.clone())
}

fn user_email(user: &User) -> Value {
    Value::from(user.email.clone())
}

fn user_region(user: &User) -> Value {
    Value::from(user.region.clone())
}

fn user_score(user: &User) -> Value {
    Value::from(user.score)
}

fn user_status(user: &User) -> Value {
    Value::from(user.status.clone())
}

fn user_tags(user: &User) -> Value {
    Value::Tuple(user.tags.iter().map(|tag| Value::from(tag.clone())).collect())
}

static USER_FIELDS: [FieldDescriptor<User>; 6] = [
    FieldDescriptor::scalar("id", user_id),
    FieldDescriptor::scalar("email", user_email),
    FieldDescriptor::scalar("region", user_region),
    FieldDescriptor::scalar("score", user_score),
    FieldDescriptor::scalar("status", user_status),
    FieldDescriptor::repeated("tags", user_tags),
];

impl Record for User {
    const TYPE: &'static str = "User";

    fn primary_key(&self) -> Vec<Value> {
        vec![Value::from(self.id.clone())]
    }

    fn fields() -> &'static [FieldDescriptor<Self>] {
        &USER_FIELDS
    }

    fn indexes() -> Vec<IndexDescriptor> {
        vec![
            IndexDescriptor::scalar("user_email", vec!["email"]).unique(),
            IndexDescriptor::scalar("user_score", vec!["score"]),
            IndexDescriptor::scalar("user_region_status", vec!["region", "status"]),
            IndexDescriptor::scalar("user_tags", vec!["tags"]),
            IndexDescriptor::new("user_count_by_region", IndexKind::Count, vec!["region"]),
            IndexDescriptor::new("user_region_flag", IndexKind::Bitmap, vec!["region"]),
        ]
    }
}

/// An order contributing to sum/average/distinct aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub category: String,
    pub amount: f64,
    pub region: String,
}

impl Order {
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        amount: f64,
        region: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            amount,
            region: region.into(),
        }
    }
}

fn order_id(order: &Order) -> Value {
    Value::from(order.id.clone())
}

fn order_category(order: &Order) -> Value {
    Value::from(order.category.clone())
}

fn order_amount(order: &Order) -> Value {
    Value::from(order.amount)
}

fn order_region(order: &Order) -> Value {
    Value::from(order.region.clone())
}

static ORDER_FIELDS: [FieldDescriptor<Order>; 4] = [
    FieldDescriptor::scalar("id", order_id),
    FieldDescriptor::scalar("category", order_category),
    FieldDescriptor::scalar("amount", order_amount),
    FieldDescriptor::scalar("region", order_region),
];

impl Record for Order {
    const TYPE: &'static str = "Order";

    fn primary_key(&self) -> Vec<Value> {
        vec![Value::from(self.id.clone())]
    }

    fn fields() -> &'static [FieldDescriptor<Self>] {
        &ORDER_FIELDS
    }

    fn indexes() -> Vec<IndexDescriptor> {
        vec![
            IndexDescriptor::new(
                "order_amount_by_category",
                IndexKind::Sum,
                vec!["category", "amount"],
            ),
            IndexDescriptor::new(
                "order_avg_by_category",
                IndexKind::Average,
                vec!["category", "amount"],
            ),
            IndexDescriptor::new(
                "order_regions_by_category",
                IndexKind::Distinct {
                    precision: DEFAULT_DISTINCT_PRECISION,
                },
                vec!["category", "region"],
            ),
        ]
    }
}

/// A product contributing to min/max aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub category: String,
    pub price: f64,
}

impl Product {
    pub fn new(id: impl Into<String>, category: impl Into<String>, price: f64) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            price,
        }
    }
}

fn product_id(product: &Product) -> Value {
    Value::from(product.id.clone())
}

fn product_category(product: &Product) -> Value {
    Value::from(product.category.clone())
}

fn product_price(product: &Product) -> Value {
    Value::from(product.price)
}

static PRODUCT_FIELDS: [FieldDescriptor<Product>; 3] = [
    FieldDescriptor::scalar("id", product_id),
    FieldDescriptor::scalar("category", product_category),
    FieldDescriptor::scalar("price", product_price),
];

impl Record for Product {
    const TYPE: &'static str = "Product";

    fn primary_key(&self) -> Vec<Value> {
        vec![Value::from(self.id.clone())]
    }

    fn fields() -> &'static [FieldDescriptor<Self>] {
        &PRODUCT_FIELDS
    }

    fn indexes() -> Vec<IndexDescriptor> {
        vec![
            IndexDescriptor::new("product_min_price", IndexKind::Min, vec!["category", "price"]),
            IndexDescriptor::new("product_max_price", IndexKind::Max, vec!["category", "price"]),
        ]
    }
}

/// A follow edge for graph adjacency tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Follow {
    pub id: String,
    pub from: String,
    pub to: String,
    pub kind: String,
}

impl Follow {
    pub fn new(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            kind: kind.into(),
        }
    }
}

fn follow_id(follow: &Follow) -> Value {
    Value::from(follow.id.clone())
}

fn follow_from(follow: &Follow) -> Value {
    Value::from(follow.from.clone())
}

fn follow_to(follow: &Follow) -> Value {
    Value::from(follow.to.clone())
}

fn follow_kind(follow: &Follow) -> Value {
    Value::from(follow.kind.clone())
}

static FOLLOW_FIELDS: [FieldDescriptor<Follow>; 4] = [
    FieldDescriptor::scalar("id", follow_id),
    FieldDescriptor::scalar("from", follow_from),
    FieldDescriptor::scalar("to", follow_to),
    FieldDescriptor::scalar("kind", follow_kind),
];

impl Record for Follow {
    const TYPE: &'static str = "Follow";

    fn primary_key(&self) -> Vec<Value> {
        vec![Value::from(self.id.clone())]
    }

    fn fields() -> &'static [FieldDescriptor<Self>] {
        &FOLLOW_FIELDS
    }

    fn indexes() -> Vec<IndexDescriptor> {
        vec![IndexDescriptor::new(
            "follow_graph",
            IndexKind::Graph {
                direction: GraphDirection::Outgoing,
                edge_path: "kind",
            },
            vec!["from", "to"],
        )]
    }
}

/// An account whose unique handle index ships disabled, for online index
/// build tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub handle: String,
}

impl Account {
    pub fn new(id: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handle: handle.into(),
        }
    }
}

fn account_id(account: &Account) -> Value {
    Value::from(account.id.clone())
}

fn account_handle(account: &Account) -> Value {
    Value::from(account.handle.clone())
}

static ACCOUNT_FIELDS: [FieldDescriptor<Account>; 2] = [
    FieldDescriptor::scalar("id", account_id),
    FieldDescriptor::scalar("handle", account_handle),
];

impl Record for Account {
    const TYPE: &'static str = "Account";

    fn primary_key(&self) -> Vec<Value> {
        vec![Value::from(self.id.clone())]
    }

    fn fields() -> &'static [FieldDescriptor<Self>] {
        &ACCOUNT_FIELDS
    }

    fn indexes() -> Vec<IndexDescriptor> {
        vec![IndexDescriptor::scalar("account_handle", vec!["handle"])
            .unique()
            .with_initial_state(IndexState::Disabled)]
    }
}

/// A play event for time-window leaderboard tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Play {
    pub id: String,
    pub game: String,
    pub player: String,
    pub score: i64,
    /// Unix seconds.
    pub at: i64,
}

impl Play {
    pub fn new(
        id: impl Into<String>,
        game: impl Into<String>,
        player: impl Into<String>,
        score: i64,
        at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            game: game.into(),
            player: player.into(),
            score,
            at,
        }
    }
}

fn play_id(play: &Play) -> Value {
    Value::from(play.id.clone())
}

fn play_game(play: &Play) -> Value {
    Value::from(play.game.clone())
}

fn play_player(play: &Play) -> Value {
    Value::from(play.player.clone())
}

fn play_score(play: &Play) -> Value {
    Value::from(play.score)
}

fn play_at(play: &Play) -> Value {
    Value::from(play.at)
}

static PLAY_FIELDS: [FieldDescriptor<Play>; 5] = [
    FieldDescriptor::scalar("id", play_id),
    FieldDescriptor::scalar("game", play_game),
    FieldDescriptor::scalar("player", play_player),
    FieldDescriptor::scalar("score", play_score),
    FieldDescriptor::scalar("at", play_at),
];

/// Leaderboard window width used by the fixtures, in seconds.
pub const PLAY_WINDOW: u64 = 3600;
/// Windows retained per game by the fixtures.
pub const PLAY_WINDOW_COUNT: u32 = 4;

impl Record for Play {
    const TYPE: &'static str = "Play";

    fn primary_key(&self) -> Vec<Value> {
        vec![Value::from(self.id.clone())]
    }

    fn fields() -> &'static [FieldDescriptor<Self>] {
        &PLAY_FIELDS
    }

    fn indexes() -> Vec<IndexDescriptor> {
        vec![IndexDescriptor::new(
            "play_leaderboard",
            IndexKind::TimeWindowLeaderboard {
                window: PLAY_WINDOW,
                window_count: PLAY_WINDOW_COUNT,
                group_by: 1,
            },
            vec!["game", "score", "at"],
        )]
    }
}
