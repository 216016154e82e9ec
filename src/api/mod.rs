use rocket::Route;

mod admin;
mod registration;
mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(registration::routes());
    routes.extend(voting::routes());
    routes.extend(admin::routes());
    routes
}
