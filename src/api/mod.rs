pub mod v1;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use crate::app::AppState;

use v1::{
    account,
    auth::{self, access_guard, AccessGuard, UserRole},
    order, recipient,
};

const ADMIN: &[UserRole] = &[UserRole::Admin];
const DELIVERYMAN: &[UserRole] = &[UserRole::Deliveryman];
const ANY_ROLE: &[UserRole] = &[UserRole::Admin, UserRole::Deliveryman];

fn guarded(
    routes: Router<AppState>,
    state: &AppState,
    allowed: &'static [UserRole],
) -> Router<AppState> {
    routes.route_layer(middleware::from_fn_with_state(
        AccessGuard::new(state.jwt_state.clone(), allowed),
        access_guard,
    ))
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/orders", get(order::index).post(order::create))
        .route(
            "/orders/:id",
            get(order::show).put(order::update).delete(order::delete),
        )
        .route("/orders/:id/status/withdrawn", patch(order::mark_withdrawn))
        .route("/orders/:id/status/delivered", patch(order::mark_delivered))
        .route("/orders/:id/status/canceled", patch(order::mark_canceled))
        .route("/recipients", get(recipient::index).post(recipient::create))
        .route(
            "/recipients/:id",
            get(recipient::show)
                .put(recipient::update)
                .delete(recipient::delete),
        )
        .route(
            "/deliverymen",
            get(account::index_deliverymen).post(account::create_deliveryman),
        )
        .route(
            "/deliverymen/:id",
            get(account::show_deliveryman)
                .put(account::update_deliveryman)
                .delete(account::delete_deliveryman),
        )
        .route("/users", get(account::index).post(account::create))
        .route(
            "/users/:id",
            get(account::show)
                .put(account::update)
                .delete(account::delete),
        );

    let deliveryman = Router::new()
        .route("/orders/delivery", get(order::index_delivery))
        .route("/orders/:id/pickup", patch(order::pickup))
        .route(
            "/orders/:id/deliver",
            patch(order::deliver).layer(order::deliver_body_limit()),
        );

    let shared = Router::new()
        .route("/users/:id/orders", get(account::orders))
        .route("/profile", get(auth::profile));

    Router::new()
        .route("/sessions", post(auth::login))
        .merge(guarded(admin, &state, ADMIN))
        .merge(guarded(deliveryman, &state, DELIVERYMAN))
        .merge(guarded(shared, &state, ANY_ROLE))
        .with_state(state)
}
