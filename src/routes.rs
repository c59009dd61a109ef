use std::sync::Arc;

use actix_web::http::header;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Auth;
use crate::error::ApiError;
use crate::locator::{self, PostLocation, PostLocator};
use crate::models::*;
use crate::notify::{self, Notifier, TracingNotifier};
use crate::pagination::{self, PageDescriptor, PageSize};
use crate::plugin::{PluginBranchService, RepoBranchService};
use crate::policy::{self, Actor};
use crate::presence::{PresenceLookup, PresenceRegistry};
use crate::quote;
use crate::repo::{BranchRepo, PostReader, PostWriter, ReadMarkRepo, Repo, TopicRepo};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/branches")
                    .route(web::get().to(list_branches))
                    .route(web::post().to(create_branch)),
            )
            .service(web::resource("/branches/{id}").route(web::get().to(get_branch)))
            .service(web::resource("/branches/{id}/topics").route(web::get().to(list_topics)))
            .service(web::resource("/topics").route(web::post().to(create_topic)))
            .service(web::resource("/topics/{id}").route(web::get().to(show_topic)))
            .service(web::resource("/topics/{id}/close").route(web::post().to(close_topic)))
            .service(web::resource("/topics/{id}/open").route(web::post().to(open_topic)))
            .service(
                web::resource("/topics/{id}/subscription")
                    .route(web::post().to(subscribe))
                    .route(web::delete().to(unsubscribe)),
            )
            .service(web::resource("/posts").route(web::post().to(create_post)))
            .service(
                web::resource("/posts/{id}")
                    .route(web::get().to(get_post))
                    .route(web::put().to(update_post))
                    .route(web::delete().to(delete_post)),
            )
            .service(web::resource("/posts/{id}/location").route(web::get().to(post_location)))
            .service(web::resource("/posts/{id}/quote").route(web::get().to(quote_post))),
    );
    // public links: shared post permalinks and the topic page they land on
    cfg.route("/posts/{id}", web::get().to(redirect_to_post));
    cfg.route("/topics/{id}", web::get().to(show_topic));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub branches: Arc<dyn PluginBranchService>,
    pub presence: Arc<PresenceRegistry>,
    pub notifier: Arc<dyn Notifier>,
    pub page_size: PageSize,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>, presence: Arc<PresenceRegistry>, page_size: PageSize) -> Self {
        Self {
            branches: Arc::new(RepoBranchService::new(repo.clone())),
            repo,
            presence,
            notifier: Arc::new(TracingNotifier),
            page_size,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    fn locator(&self) -> PostLocator<'_, dyn Repo> {
        PostLocator::new(self.repo.as_ref(), self.page_size)
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

fn parse_page(raw: Option<&str>) -> Result<usize, ApiError> {
    match raw {
        None => Ok(1),
        Some(v) => v
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|p| *p >= 1)
            .ok_or_else(|| ApiError::BadRequest("page must be a positive integer".into())),
    }
}

// ---------------- Branches ----------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/branches",
    responses((status = 200, description = "List branches", body = [Branch]))
)]
pub async fn list_branches(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.list_branches().await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/branches",
    request_body = NewBranch,
    responses(
        (status = 201, description = "Branch created", body = Branch),
        (status = 403, description = "Forbidden – Admins only"),
        (status = 409, description = "Name already taken")
    )
)]
pub async fn create_branch(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewBranch>,
) -> Result<HttpResponse, ApiError> {
    if !auth.0.is_admin() {
        return Err(ApiError::Forbidden);
    }
    let mut new = payload.into_inner();
    new.name = new.name.trim().to_string();
    if new.name.is_empty() {
        return Err(ApiError::BadRequest("branch name must not be blank".into()));
    }
    let branch = data.repo.create_branch(new).await?;
    Ok(HttpResponse::Created().json(branch))
}

#[utoipa::path(
    get,
    path = "/api/v1/branches/{id}",
    params(("id" = i64, Path, description = "Branch id")),
    responses(
        (status = 200, description = "Branch", body = Branch),
        (status = 404, description = "Branch not found")
    )
)]
pub async fn get_branch(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let branch = data.branches.get(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(branch))
}

#[utoipa::path(
    get,
    path = "/api/v1/branches/{id}/topics",
    params(("id" = i64, Path, description = "Branch id")),
    responses(
        (status = 200, description = "Topics, newest first", body = [Topic]),
        (status = 404, description = "Branch not found")
    )
)]
pub async fn list_topics(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.list_topics(path.into_inner()).await?))
}

// ---------------- Topics ------------------------------------------

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PostView {
    pub post: Post,
    pub can_edit: bool,
    pub can_delete: bool,
    pub author_online: bool,
    /// Posted after the viewer's read mark. Always false for anonymous viewers.
    pub unread: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TopicPage {
    pub topic: Topic,
    pub page: PageDescriptor,
    pub posts: Vec<PostView>,
    pub can_reply: bool,
    pub subscribed: bool,
    /// Viewer's read mark as it stood before this page was served.
    pub last_read_post: Option<Id>,
    pub viewing: Vec<Id>,
    pub users_online: usize,
}

#[utoipa::path(
    get,
    path = "/api/v1/topics/{id}",
    params(
        ("id" = i64, Path, description = "Topic id"),
        ("page" = Option<usize>, Query, description = "1-based page, defaults to 1")
    ),
    responses(
        (status = 200, description = "One page of the topic", body = TopicPage),
        (status = 400, description = "Invalid page"),
        (status = 404, description = "Topic not found")
    )
)]
pub async fn show_topic(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let page = parse_page(query.page.as_deref())?;
    let topic = data.repo.get_topic(path.into_inner()).await?;
    let actor: Option<Actor> = auth.map(|a| a.0);
    if let Some(a) = &actor {
        data.presence.record_view(a.id, topic.id);
    }

    let total = data.repo.count_posts(topic.id).await?;
    let range = pagination::range_for_page(page, data.page_size, total);
    let (offset, limit) = pagination::window(&range);
    let posts = if limit == 0 {
        Vec::new()
    } else {
        data.repo.list_posts(topic.id, offset, limit).await?
    };
    let subscribers = data.repo.subscribers(topic.id).await?;

    let last_read_post = match &actor {
        Some(a) => data.repo.last_read(topic.id, a.id).await?,
        None => None,
    };
    // ordinal of the mark; 0 when nothing has been read yet
    let read_up_to = match last_read_post {
        Some(mark) => locator::ordinal_of(&data.repo.ordered_post_ids(topic.id).await?, mark).unwrap_or(0),
        None => 0,
    };
    if let (Some(a), Some(last)) = (&actor, posts.last()) {
        data.repo.mark_read(topic.id, a.id, last.id).await?;
    }

    let posts = posts
        .into_iter()
        .zip(range.clone())
        .map(|(post, ordinal)| PostView {
            can_edit: policy::can_edit(actor.as_ref(), &post),
            can_delete: policy::can_delete(actor.as_ref(), &post),
            author_online: data.presence.is_online(post.author_id),
            unread: actor.is_some() && ordinal > read_up_to,
            post,
        })
        .collect();

    let view = TopicPage {
        can_reply: policy::can_reply(actor.as_ref(), &topic),
        subscribed: actor.as_ref().is_some_and(|a| subscribers.contains(&a.id)),
        last_read_post,
        viewing: data.presence.viewing(topic.id),
        users_online: data.presence.online_count(),
        page: PageDescriptor::new(page, data.page_size, total),
        posts,
        topic,
    };
    Ok(HttpResponse::Ok().json(view))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatedTopic {
    pub topic: Topic,
    pub post: Post,
    pub redirect: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/topics",
    request_body = NewTopic,
    responses(
        (status = 201, description = "Topic created with its first post", body = CreatedTopic),
        (status = 400, description = "Invalid title or body"),
        (status = 404, description = "Branch not found")
    )
)]
pub async fn create_topic(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewTopic>,
) -> Result<HttpResponse, ApiError> {
    let NewTopic { branch_id, title, body, code_review } = payload.into_inner();
    let title = normalize_title(&title).map_err(ApiError::BadRequest)?;
    let body = normalize_body(&body).map_err(ApiError::BadRequest)?;
    let (topic, post) = data
        .repo
        .create_topic(NewTopic { branch_id, title, body, code_review }, &auth.0.author())
        .await?;
    data.repo.mark_read(topic.id, auth.0.id, post.id).await?;
    let location = data.locator().locate_page(post.id).await?;
    Ok(HttpResponse::Created().json(CreatedTopic { redirect: location.redirect_path(), topic, post }))
}

async fn set_closed(auth: Auth, data: web::Data<AppState>, topic_id: Id, closed: bool) -> Result<HttpResponse, ApiError> {
    if !policy::can_moderate(Some(&auth.0)) {
        return Err(ApiError::Forbidden);
    }
    let topic = data.repo.set_closed(topic_id, closed).await?;
    Ok(HttpResponse::Ok().json(topic))
}

#[utoipa::path(
    post,
    path = "/api/v1/topics/{id}/close",
    params(("id" = i64, Path, description = "Topic id")),
    responses(
        (status = 200, description = "Topic closed", body = Topic),
        (status = 403, description = "Moderators only"),
        (status = 404, description = "Topic not found")
    )
)]
pub async fn close_topic(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    set_closed(auth, data, path.into_inner(), true).await
}

#[utoipa::path(
    post,
    path = "/api/v1/topics/{id}/open",
    params(("id" = i64, Path, description = "Topic id")),
    responses(
        (status = 200, description = "Topic reopened", body = Topic),
        (status = 403, description = "Moderators only"),
        (status = 404, description = "Topic not found")
    )
)]
pub async fn open_topic(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    set_closed(auth, data, path.into_inner(), false).await
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Subscription {
    pub topic_id: Id,
    pub subscribed: bool,
}

#[utoipa::path(
    post,
    path = "/api/v1/topics/{id}/subscription",
    params(("id" = i64, Path, description = "Topic id")),
    responses(
        (status = 200, description = "Subscribed to new replies", body = Subscription),
        (status = 404, description = "Topic not found")
    )
)]
pub async fn subscribe(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let topic_id = path.into_inner();
    data.repo.subscribe(topic_id, auth.0.id).await?;
    Ok(HttpResponse::Ok().json(Subscription { topic_id, subscribed: true }))
}

#[utoipa::path(
    delete,
    path = "/api/v1/topics/{id}/subscription",
    params(("id" = i64, Path, description = "Topic id")),
    responses(
        (status = 200, description = "Subscription removed", body = Subscription),
        (status = 404, description = "Topic not found")
    )
)]
pub async fn unsubscribe(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let topic_id = path.into_inner();
    data.repo.unsubscribe(topic_id, auth.0.id).await?;
    Ok(HttpResponse::Ok().json(Subscription { topic_id, subscribed: false }))
}

// ---------------- Posts -------------------------------------------

/// Permalink: redirects to the topic page currently holding the post.
#[utoipa::path(
    get,
    path = "/posts/{id}",
    params(("id" = i64, Path, description = "Post id")),
    responses(
        (status = 302, description = "Redirect to /topics/{topic}?page={page}#{post}"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn redirect_to_post(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let location = data.locator().locate_page(path.into_inner()).await?;
    Ok(HttpResponse::Found()
        .insert_header((header::LOCATION, location.redirect_path()))
        .finish())
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LocatedPost {
    pub location: PostLocation,
    pub redirect: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/posts/{id}/location",
    params(("id" = i64, Path, description = "Post id")),
    responses(
        (status = 200, description = "Topic page holding the post", body = LocatedPost),
        (status = 404, description = "Post not found")
    )
)]
pub async fn post_location(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let location = data.locator().locate_page(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(LocatedPost { redirect: location.redirect_path(), location }))
}

#[utoipa::path(
    get,
    path = "/api/v1/posts/{id}",
    params(("id" = i64, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post", body = Post),
        (status = 404, description = "Post not found")
    )
)]
pub async fn get_post(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.get_post(path.into_inner()).await?))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatedPost {
    pub post: Post,
    pub location: PostLocation,
    pub redirect: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/posts",
    request_body = NewPost,
    responses(
        (status = 201, description = "Reply created", body = CreatedPost),
        (status = 400, description = "Invalid body"),
        (status = 403, description = "Topic is closed or a code review"),
        (status = 404, description = "Topic not found")
    )
)]
pub async fn create_post(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewPost>,
) -> Result<HttpResponse, ApiError> {
    let actor = auth.0;
    let NewPost { topic_id, body } = payload.into_inner();
    let body = normalize_body(&body).map_err(ApiError::BadRequest)?;
    let topic = data.repo.get_topic(topic_id).await?;
    let post = data
        .repo
        .reply_to_topic(NewPost { topic_id, body }, &actor.author(), actor.is_privileged())
        .await?;
    // own replies never show up as unread
    data.repo.mark_read(topic.id, actor.id, post.id).await?;

    let subscribers = data.repo.subscribers(topic.id).await?;
    data.notifier
        .new_post(&topic, &post, &notify::recipients(&subscribers, &post))
        .await;

    let location = data.locator().locate_page(post.id).await?;
    Ok(HttpResponse::Created().json(CreatedPost { redirect: location.redirect_path(), location, post }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdatedPost {
    pub post: Post,
    pub redirect: String,
}

#[utoipa::path(
    put,
    path = "/api/v1/posts/{id}",
    request_body = UpdatePost,
    params(("id" = i64, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post updated", body = UpdatedPost),
        (status = 400, description = "Invalid body"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn update_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdatePost>,
) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(path.into_inner()).await?;
    if !policy::can_edit(Some(&auth.0), &post) {
        return Err(ApiError::Forbidden);
    }
    let body = normalize_body(&payload.body).map_err(ApiError::BadRequest)?;
    let post = data.repo.update_post(post.id, body).await?;
    Ok(HttpResponse::Ok().json(UpdatedPost { redirect: format!("/posts/{}", post.id), post }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeletedPost {
    pub topic_removed: bool,
    pub redirect: String,
}

#[utoipa::path(
    delete,
    path = "/api/v1/posts/{id}",
    params(("id" = i64, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post deleted", body = DeletedPost),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn delete_post(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(path.into_inner()).await?;
    if !policy::can_delete(Some(&auth.0), &post) {
        return Err(ApiError::Forbidden);
    }
    let body = match data.repo.delete_post(post.id).await? {
        PostDeletion::PostRemoved { topic_id } => DeletedPost {
            topic_removed: false,
            redirect: format!("/topics/{topic_id}"),
        },
        PostDeletion::TopicRemoved { branch_id, .. } => DeletedPost {
            topic_removed: true,
            redirect: format!("/branches/{branch_id}"),
        },
    };
    Ok(HttpResponse::Ok().json(body))
}

#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    pub selection: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QuoteResponse {
    pub status: String,
    pub result: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/posts/{id}/quote",
    params(
        ("id" = i64, Path, description = "Post id"),
        ("selection" = Option<String>, Query, description = "Selected text; whole body when absent")
    ),
    responses(
        (status = 200, description = "BBCode quote", body = QuoteResponse),
        (status = 404, description = "Post not found")
    )
)]
pub async fn quote_post(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<QuoteQuery>,
) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(path.into_inner()).await?;
    let content = quote::quote_source(query.selection.as_deref(), &post.body);
    Ok(HttpResponse::Ok().json(QuoteResponse {
        status: "SUCCESS".into(),
        result: quote::quote(content, &post.author_name),
    }))
}
