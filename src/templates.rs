use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};
use rust_embed::RustEmbed;

use crate::models::{Actor, Group, User};
use crate::posts::render_text;
use crate::query::{CommentView, Page, PostView};

#[derive(RustEmbed)]
#[folder = "templates"]
struct Assets;

/// Field name and message pairs shown above a form.
pub type FormErrors = Vec<(&'static str, String)>;

fn template(name: &str) -> anyhow::Result<String> {
    let file = Assets::get(name).ok_or_else(|| anyhow::anyhow!("Template {} not found", name))?;
    Ok(String::from_utf8(file.data.to_vec())?)
}

fn nav(actor: &Actor) -> String {
    match actor.user() {
        Some(user) => format!(
            concat!(
                "      <a href=\"/create/\">New post</a>\n",
                "      <a href=\"/follow/\">Subscriptions</a>\n",
                "      <a href=\"/profile/{}/\">{}</a>\n",
                "      <a href=\"/auth/logout/\">Log out</a>"
            ),
            attr(&user.username),
            text(&user.username)
        ),
        None => concat!(
            "      <a href=\"/auth/login/\">Log in</a>\n",
            "      <a href=\"/auth/signup/\">Sign up</a>"
        )
        .to_string(),
    }
}

/// Replace each marker of `template` with its value in one pass; inserted
/// values are never scanned for markers again.
fn fill(template: &str, slots: &[(&str, &str)]) -> String {
    let mut html = String::with_capacity(template.len());
    let mut rest = template;
    while let Some((at, marker, value)) = slots
        .iter()
        .filter_map(|(marker, value)| rest.find(marker).map(|at| (at, *marker, *value)))
        .min_by_key(|(at, _, _)| *at)
    {
        html.push_str(&rest[..at]);
        html.push_str(value);
        rest = &rest[at + marker.len()..];
    }
    html.push_str(rest);
    html
}

pub fn layout(title: &str, actor: &Actor, content: &str) -> anyhow::Result<String> {
    let html = template("base.html")?;
    let title = text(title);
    let nav = nav(actor);
    Ok(fill(
        &html,
        &[("PAGE_TITLE", &title), ("PAGE_NAV", &nav), ("PAGE_CONTENT", content)],
    ))
}

fn post_card(view: &PostView, with_link: bool) -> String {
    let mut html = String::from("<article class=\"post\">\n  <ul class=\"post-meta\">\n");
    html.push_str(&format!(
        "    <li>Author: <a href=\"/profile/{}/\">{}</a></li>\n",
        attr(&view.author.username),
        text(&view.author.username)
    ));
    html.push_str(&format!(
        "    <li>Published: {}</li>\n",
        view.post.created_at.format("%d %b %Y %H:%M")
    ));
    if let Some(group) = &view.group {
        html.push_str(&format!(
            "    <li>Group: <a href=\"/group/{}/\">{}</a></li>\n",
            attr(&group.slug),
            text(&group.title)
        ));
    }
    html.push_str("  </ul>\n");
    if let Some(image) = &view.post.image {
        html.push_str(&format!("  <img src=\"/media/{}\" alt=\"\">\n", attr(image)));
    }
    html.push_str(&format!("  <p>{}</p>\n", render_text(&view.post.text)));
    if with_link {
        html.push_str(&format!(
            "  <a href=\"/posts/{}/\">Details</a> <span class=\"comments\">Comments: {}</span>\n",
            attr(&view.post.id),
            view.comment_count
        ));
    }
    html.push_str("</article>\n");
    html
}

fn page_link(base_path: &str, number: usize, anchor: Option<&str>) -> String {
    match anchor {
        Some(anchor) => format!(
            "{}?page={}&amp;anchor={}",
            base_path,
            number,
            urlencoding::encode(anchor)
        ),
        None => format!("{}?page={}", base_path, number),
    }
}

fn paginator(page: &Page<PostView>, base_path: &str, anchor: Option<&str>) -> String {
    if page.num_pages <= 1 {
        return String::new();
    }
    let mut html = String::from("<nav class=\"paginator\">\n");
    if page.has_previous() {
        html.push_str(&format!(
            "  <a href=\"{}\">&laquo; Previous</a>\n",
            page_link(base_path, page.number - 1, anchor)
        ));
    }
    html.push_str(&format!("  <span>Page {} of {}</span>\n", page.number, page.num_pages));
    if page.has_next() {
        html.push_str(&format!(
            "  <a href=\"{}\">Next &raquo;</a>\n",
            page_link(base_path, page.number + 1, anchor)
        ));
    }
    html.push_str("</nav>\n");
    html
}

pub fn post_list(page: &Page<PostView>, base_path: &str, anchor: Option<&str>) -> String {
    let mut html = String::new();
    if page.items.is_empty() {
        html.push_str("<p class=\"empty\">No posts yet.</p>\n");
    }
    for view in &page.items {
        html.push_str(&post_card(view, true));
    }
    html.push_str(&paginator(page, base_path, anchor));
    html
}

pub fn index_content(page: &Page<PostView>, anchor: Option<&str>) -> String {
    format!("<h1>Latest posts</h1>\n{}", post_list(page, "/", anchor))
}

pub fn follow_content(page: &Page<PostView>, anchor: Option<&str>) -> String {
    format!(
        "<h1>Posts of authors you follow</h1>\n{}",
        post_list(page, "/follow/", anchor)
    )
}

pub fn group_content(group: &Group, page: &Page<PostView>, anchor: Option<&str>) -> String {
    format!(
        "<h1>{}</h1>\n<p class=\"group-description\">{}</p>\n{}",
        text(&group.title),
        text(&group.description),
        post_list(page, &format!("/group/{}/", group.slug), anchor)
    )
}

/// Counters shown on an author's profile.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProfileStats {
    pub posts: usize,
    pub followers: usize,
    pub following: usize,
}

/// `following` is `None` when the viewer cannot follow this author (anonymous
/// or the author themself).
pub fn profile_content(
    author: &User,
    stats: ProfileStats,
    following: Option<bool>,
    page: &Page<PostView>,
    anchor: Option<&str>,
) -> String {
    let mut html = format!(
        "<h1>All posts of {}</h1>\n<p class=\"profile-stats\">Posts: {} &middot; Followers: {} &middot; Following: {}</p>\n",
        text(&author.username),
        stats.posts,
        stats.followers,
        stats.following
    );
    match following {
        Some(true) => html.push_str(&format!(
            "<a class=\"unfollow\" href=\"/profile/{}/unfollow/\">Unfollow</a>\n",
            attr(&author.username)
        )),
        Some(false) => html.push_str(&format!(
            "<a class=\"follow\" href=\"/profile/{}/follow/\">Follow</a>\n",
            attr(&author.username)
        )),
        None => {}
    }
    html.push_str(&post_list(page, &format!("/profile/{}/", author.username), anchor));
    html
}

fn error_list(errors: &FormErrors) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let mut html = String::from("<ul class=\"errorlist\">\n");
    for (field, message) in errors {
        html.push_str(&format!(
            "  <li data-field=\"{}\">{}</li>\n",
            field,
            text(message)
        ));
    }
    html.push_str("</ul>\n");
    html
}

pub fn post_detail_content(view: &PostView, comments: &[CommentView], actor: &Actor, errors: &FormErrors) -> String {
    let mut html = post_card(view, false);
    html.push_str(&format!("<p>Comments: {}</p>\n", view.comment_count));

    if actor.id() == Some(view.post.author_id.as_str()) {
        html.push_str(&format!(
            concat!(
                "<a href=\"/posts/{id}/edit/\">Edit</a>\n",
                "<form method=\"post\" action=\"/posts/{id}/delete/\"><button type=\"submit\">Delete</button></form>\n"
            ),
            id = attr(&view.post.id)
        ));
    }

    if actor.is_authenticated() {
        html.push_str(&error_list(errors));
        html.push_str(&format!(
            concat!(
                "<form method=\"post\" action=\"/posts/{}/comment/\">\n",
                "  <label for=\"id_text\">Add a comment:</label>\n",
                "  <textarea name=\"text\" id=\"id_text\"></textarea>\n",
                "  <button type=\"submit\">Send</button>\n",
                "</form>\n"
            ),
            attr(&view.post.id)
        ));
    }

    html.push_str("<section class=\"comments\">\n");
    for entry in comments {
        html.push_str(&format!(
            "  <div class=\"comment\"><a href=\"/profile/{}/\">{}</a>: <p>{}</p></div>\n",
            attr(&entry.author.username),
            text(&entry.author.username),
            render_text(&entry.comment.text)
        ));
    }
    html.push_str("</section>\n");
    html
}

/// Values the post form is filled with.
#[derive(Clone, Debug, Default)]
pub struct PostFormValues {
    pub text: String,
    pub group: Option<String>,
    pub image: Option<String>,
}

pub fn post_form(heading: &str, action: &str, values: &PostFormValues, groups: &[Group], errors: &FormErrors) -> String {
    let mut options = String::from("    <option value=\"\">---------</option>\n");
    for group in groups {
        let selected = if values.group.as_deref() == Some(group.slug.as_str()) {
            " selected"
        } else {
            ""
        };
        options.push_str(&format!(
            "    <option value=\"{}\"{}>{}</option>\n",
            attr(&group.slug),
            selected,
            text(&group.title)
        ));
    }

    format!(
        concat!(
            "<h1>{heading}</h1>\n",
            "{errors}",
            "<form method=\"post\" action=\"{action}\">\n",
            "  <label for=\"id_text\">Post text</label>\n",
            "  <textarea name=\"text\" id=\"id_text\">{text}</textarea>\n",
            "  <small>Text of the new post</small>\n",
            "  <label for=\"id_group\">Group: </label>\n",
            "  <select name=\"group\" id=\"id_group\">\n{options}  </select>\n",
            "  <small>Group the post will belong to</small>\n",
            "  <label for=\"id_image\">Image</label>\n",
            "  <input type=\"text\" name=\"image\" id=\"id_image\" value=\"{image}\">\n",
            "  <button type=\"submit\">Save</button>\n",
            "</form>\n"
        ),
        heading = text(heading),
        errors = error_list(errors),
        action = attr(action),
        text = text(&values.text),
        options = options,
        image = attr(values.image.as_deref().unwrap_or("")),
    )
}

pub fn login_form(next: Option<&str>, username: &str, errors: &FormErrors) -> String {
    let next_input = next
        .map(|n| format!("  <input type=\"hidden\" name=\"next\" value=\"{}\">\n", attr(n)))
        .unwrap_or_default();
    format!(
        concat!(
            "<h1>Log in</h1>\n",
            "{errors}",
            "<form method=\"post\" action=\"/auth/login/\">\n",
            "{next}",
            "  <input type=\"text\" name=\"username\" value=\"{username}\">\n",
            "  <input type=\"password\" name=\"password\">\n",
            "  <button type=\"submit\">Log in</button>\n",
            "</form>\n"
        ),
        errors = error_list(errors),
        next = next_input,
        username = attr(username),
    )
}

pub fn signup_form(username: &str, errors: &FormErrors) -> String {
    format!(
        concat!(
            "<h1>Sign up</h1>\n",
            "{errors}",
            "<form method=\"post\" action=\"/auth/signup/\">\n",
            "  <input type=\"text\" name=\"username\" value=\"{username}\">\n",
            "  <input type=\"password\" name=\"password\">\n",
            "  <button type=\"submit\">Sign up</button>\n",
            "</form>\n"
        ),
        errors = error_list(errors),
        username = attr(username),
    )
}

pub fn not_found_content(path: &str) -> anyhow::Result<String> {
    Ok(template("not_found.html")?.replace("REQUEST_PATH", &text(path)))
}

pub fn server_error_content() -> anyhow::Result<String> {
    template("server_error.html")
}
