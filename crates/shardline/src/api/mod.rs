//! REST helpers for the user resource

use serde_json::{json, Value};
use shardline_core::Snowflake;
use shardline_rest::{routes, RateLimitDispatcher, RestError};

/// Filters for [`UserApi::guilds`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuildsQuery {
    pub before: Option<Snowflake>,
    pub after: Option<Snowflake>,
    /// 1-200, server default 200
    pub limit: Option<u32>,
    pub with_counts: bool,
}

impl GuildsQuery {
    fn into_path(self) -> String {
        routes::with_query(
            routes::user_guilds(),
            [
                ("before", self.before.map(|id| id.to_string())),
                ("after", self.after.map(|id| id.to_string())),
                ("limit", self.limit.map(|limit| limit.to_string())),
                ("with_counts", self.with_counts.then(|| "true".to_string())),
            ],
        )
    }
}

/// User endpoints, sent through the shared rate-limit dispatcher
#[derive(Debug, Clone, Copy)]
pub struct UserApi<'a> {
    rest: &'a RateLimitDispatcher,
}

impl<'a> UserApi<'a> {
    pub fn new(rest: &'a RateLimitDispatcher) -> Self {
        Self { rest }
    }

    /// A user by id, or the current user for `None`
    pub async fn get(&self, user_id: Option<Snowflake>) -> Result<Value, RestError> {
        self.rest.get(routes::user(user_id)).await
    }

    pub async fn current(&self) -> Result<Value, RestError> {
        self.get(None).await
    }

    /// Change username, avatar or banner of the current user
    pub async fn edit_current(&self, changes: Value) -> Result<Value, RestError> {
        self.rest.patch(routes::current_user(), changes).await
    }

    pub async fn guilds(&self, query: GuildsQuery) -> Result<Value, RestError> {
        self.rest.get(query.into_path()).await
    }

    /// Member object of the current user in a guild
    pub async fn guild_member(&self, guild_id: Snowflake) -> Result<Value, RestError> {
        self.rest.get(routes::user_guild_member(guild_id)).await
    }

    pub async fn leave_guild(&self, guild_id: Snowflake) -> Result<Value, RestError> {
        self.rest.delete(routes::user_guild(guild_id)).await
    }

    /// Open (or fetch) the DM channel with a user
    pub async fn create_dm(&self, recipient_id: Snowflake) -> Result<Value, RestError> {
        self.rest
            .post(
                routes::user_channels(),
                json!({"recipient_id": recipient_id.to_string()}),
            )
            .await
    }

    pub async fn connections(&self) -> Result<Value, RestError> {
        self.rest.get(routes::user_connections()).await
    }

    pub async fn application_role_connection(
        &self,
        application_id: Snowflake,
    ) -> Result<Value, RestError> {
        self.rest
            .get(routes::user_application_role_connection(application_id))
            .await
    }

    pub async fn update_application_role_connection(
        &self,
        application_id: Snowflake,
        connection: Value,
    ) -> Result<Value, RestError> {
        self.rest
            .put(
                routes::user_application_role_connection(application_id),
                connection,
            )
            .await
    }
}
