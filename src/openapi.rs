use crate::locator::PostLocation;
use crate::models::{Branch, NewBranch, NewPost, NewTopic, Post, Topic, UpdatePost};
use crate::pagination::PageDescriptor;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_branches,
        crate::routes::create_branch,
        crate::routes::get_branch,
        crate::routes::list_topics,
        crate::routes::show_topic,
        crate::routes::create_topic,
        crate::routes::close_topic,
        crate::routes::open_topic,
        crate::routes::subscribe,
        crate::routes::unsubscribe,
        crate::routes::redirect_to_post,
        crate::routes::post_location,
        crate::routes::get_post,
        crate::routes::create_post,
        crate::routes::update_post,
        crate::routes::delete_post,
        crate::routes::quote_post,
    ),
    components(schemas(
        Branch, NewBranch, Topic, NewTopic, Post, NewPost, UpdatePost,
        PageDescriptor, PostLocation,
        crate::routes::PostView, crate::routes::TopicPage, crate::routes::CreatedTopic,
        crate::routes::CreatedPost, crate::routes::UpdatedPost, crate::routes::DeletedPost,
        crate::routes::LocatedPost, crate::routes::QuoteResponse, crate::routes::Subscription,
    )),
    tags(
        (name = "branches", description = "Branch operations"),
        (name = "topics", description = "Topic operations"),
        (name = "posts", description = "Post operations"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_permalink_and_topic_page() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/posts/{id}"));
        assert!(doc.paths.paths.contains_key("/api/v1/topics/{id}"));
    }

    #[test]
    fn subscription_endpoints_are_documented() {
        let doc = ApiDoc::openapi();
        let item = doc.paths.paths.get("/api/v1/topics/{id}/subscription").expect("subscription path");
        assert!(item.operations.contains_key(&utoipa::openapi::PathItemType::Post));
        assert!(item.operations.contains_key(&utoipa::openapi::PathItemType::Delete));
    }
}
