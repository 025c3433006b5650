//! REST adapter for the learning platform.
//!
//! | Operation              | Request                                                        |
//! |------------------------|----------------------------------------------------------------|
//! | current schedule       | `GET  /activities/{type}/{id}/schedule`                        |
//! | find override          | `GET  /activities/{type}/{id}/overrides?user_id=…\|group_id=…` |
//! | write user override    | `PUT  /activities/{type}/{id}/overrides/users/{user_id}`       |
//! | write group override   | `PUT  /activities/{type}/{id}/overrides/groups/{group_id}`     |
//! | delete override        | `DELETE /activities/{type}/{id}/overrides/{override_id}`       |
//! | user by student code   | `GET  /users?student_code=…`                                   |
//! | enrolled courses       | `GET  /users/{id}/courses`                                     |
//! | enrolment check        | `GET  /courses/{id}/enrolments/{user_id}`                      |
//! | groups                 | `GET/POST /courses/{id}/groups`, `GET /courses/{id}/users/{user_id}/groups` |
//! | membership             | `GET /groups/{id}/members`, `PUT/DELETE /groups/{id}/members/{user_id}` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gradepush_core::activity::{ActivityType, OverrideSubject};
use gradepush_core::schedule::{ActivitySchedule, ScheduleOverride};
use gradepush_core::types::{DbId, Timestamp};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{ActivityOverride, ActivityStore, CourseDirectory, LmsError, LmsGroup, LmsUser};

/// HTTP request timeout for a single LMS call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawOverride {
    id: DbId,
    user_id: Option<DbId>,
    group_id: Option<DbId>,
    open: Option<Timestamp>,
    close: Option<Timestamp>,
    time_limit_secs: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: DbId,
}

#[derive(Debug, Deserialize)]
struct EnrolmentResponse {
    enrolled: bool,
}

#[derive(Debug, Deserialize)]
struct MembershipResponse {
    changed: bool,
}

#[derive(Debug, Serialize)]
struct CreateGroupRequest<'a> {
    name: &'a str,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Thin authenticated JSON client over the LMS REST API.
pub struct LmsRestClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl LmsRestClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, LmsError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{path}", self.base_url));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request and decode the JSON body. 404 maps to
    /// [`LmsError::NotFound`]; other non-2xx statuses to
    /// [`LmsError::HttpStatus`].
    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        path: &str,
    ) -> Result<T, LmsError> {
        let response = builder.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(LmsError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(LmsError::HttpStatus {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| LmsError::InvalidResponse(format!("{path}: {e}")))
    }

    async fn send_empty(&self, builder: RequestBuilder, path: &str) -> Result<(), LmsError> {
        let response = builder.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(LmsError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(LmsError::HttpStatus {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, LmsError> {
        self.send_json(self.request(Method::GET, path), path).await
    }
}

fn activity_path(activity_type: ActivityType, instance_id: DbId) -> String {
    format!("/activities/{}/{instance_id}", activity_type.as_str())
}

// ---------------------------------------------------------------------------
// CourseDirectory
// ---------------------------------------------------------------------------

#[async_trait]
impl CourseDirectory for LmsRestClient {
    async fn find_user_by_student_code(
        &self,
        student_code: &str,
    ) -> Result<Option<LmsUser>, LmsError> {
        let path = "/users";
        let users: Vec<LmsUser> = self
            .send_json(
                self.request(Method::GET, path)
                    .query(&[("student_code", student_code)]),
                path,
            )
            .await?;
        Ok(users.into_iter().next())
    }

    async fn enrolled_course_ids(&self, user_id: DbId) -> Result<Vec<DbId>, LmsError> {
        let courses: Vec<IdResponse> = self.get(&format!("/users/{user_id}/courses")).await?;
        Ok(courses.into_iter().map(|c| c.id).collect())
    }

    async fn is_enrolled(&self, course_id: DbId, user_id: DbId) -> Result<bool, LmsError> {
        match self
            .get::<EnrolmentResponse>(&format!("/courses/{course_id}/enrolments/{user_id}"))
            .await
        {
            Ok(r) => Ok(r.enrolled),
            Err(LmsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn find_or_create_group(&self, course_id: DbId, name: &str) -> Result<LmsGroup, LmsError> {
        let path = format!("/courses/{course_id}/groups");
        let existing: Vec<LmsGroup> = self
            .send_json(self.request(Method::GET, &path).query(&[("name", name)]), &path)
            .await?;
        if let Some(group) = existing.into_iter().find(|g| g.name == name) {
            return Ok(group);
        }

        tracing::info!(course_id, group = name, "Creating extension group");
        self.send_json(
            self.request(Method::POST, &path)
                .json(&CreateGroupRequest { name }),
            &path,
        )
        .await
    }

    async fn user_groups(&self, course_id: DbId, user_id: DbId) -> Result<Vec<LmsGroup>, LmsError> {
        self.get(&format!("/courses/{course_id}/users/{user_id}/groups"))
            .await
    }

    async fn add_group_member(&self, group_id: DbId, user_id: DbId) -> Result<bool, LmsError> {
        let path = format!("/groups/{group_id}/members/{user_id}");
        let r: MembershipResponse = self
            .send_json(self.request(Method::PUT, &path), &path)
            .await?;
        Ok(r.changed)
    }

    async fn remove_group_member(&self, group_id: DbId, user_id: DbId) -> Result<bool, LmsError> {
        let path = format!("/groups/{group_id}/members/{user_id}");
        match self
            .send_json::<MembershipResponse>(self.request(Method::DELETE, &path), &path)
            .await
        {
            Ok(r) => Ok(r.changed),
            Err(LmsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn group_member_count(&self, group_id: DbId) -> Result<usize, LmsError> {
        let members: Vec<IdResponse> = self.get(&format!("/groups/{group_id}/members")).await?;
        Ok(members.len())
    }
}

// ---------------------------------------------------------------------------
// ActivityStore
// ---------------------------------------------------------------------------

/// [`ActivityStore`] for one activity type over the shared REST client.
pub struct RestActivityStore {
    client: Arc<LmsRestClient>,
    activity_type: ActivityType,
}

impl RestActivityStore {
    pub fn new(client: Arc<LmsRestClient>, activity_type: ActivityType) -> Self {
        Self {
            client,
            activity_type,
        }
    }
}

#[async_trait]
impl ActivityStore for RestActivityStore {
    fn activity_type(&self) -> ActivityType {
        self.activity_type
    }

    async fn get_current_schedule(&self, instance_id: DbId) -> Result<ActivitySchedule, LmsError> {
        let path = format!("{}/schedule", activity_path(self.activity_type, instance_id));
        self.client.get(&path).await
    }

    async fn find_override(
        &self,
        instance_id: DbId,
        subject: OverrideSubject,
    ) -> Result<Option<ActivityOverride>, LmsError> {
        let path = format!("{}/overrides", activity_path(self.activity_type, instance_id));
        let query = match subject {
            OverrideSubject::User(id) => ("user_id", id),
            OverrideSubject::Group(id) => ("group_id", id),
        };
        let rows: Vec<RawOverride> = self
            .client
            .send_json(
                self.client.request(Method::GET, &path).query(&[query]),
                &path,
            )
            .await?;

        Ok(rows
            .into_iter()
            .find(|r| OverrideSubject::from_columns(r.user_id, r.group_id) == Some(subject))
            .map(|r| ActivityOverride {
                id: r.id,
                subject,
                schedule: ScheduleOverride {
                    open: r.open,
                    close: r.close,
                    time_limit_secs: r.time_limit_secs,
                },
            }))
    }

    async fn write_user_override(
        &self,
        instance_id: DbId,
        user_id: DbId,
        schedule: &ScheduleOverride,
    ) -> Result<DbId, LmsError> {
        let path = format!(
            "{}/overrides/users/{user_id}",
            activity_path(self.activity_type, instance_id)
        );
        let r: IdResponse = self
            .client
            .send_json(self.client.request(Method::PUT, &path).json(schedule), &path)
            .await?;
        Ok(r.id)
    }

    async fn write_group_override(
        &self,
        instance_id: DbId,
        group_id: DbId,
        schedule: &ScheduleOverride,
    ) -> Result<DbId, LmsError> {
        let path = format!(
            "{}/overrides/groups/{group_id}",
            activity_path(self.activity_type, instance_id)
        );
        let r: IdResponse = self
            .client
            .send_json(self.client.request(Method::PUT, &path).json(schedule), &path)
            .await?;
        Ok(r.id)
    }

    async fn delete_override(&self, instance_id: DbId, override_id: DbId) -> Result<(), LmsError> {
        let path = format!(
            "{}/overrides/{override_id}",
            activity_path(self.activity_type, instance_id)
        );
        self.client
            .send_empty(self.client.request(Method::DELETE, &path), &path)
            .await
    }
}
