use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::catalog::Catalog;
use crate::queue::JobQueue;
use crate::routes::{
    cancel_job_handler, get_result_handler, health_handler, json_error_handler, post_run_handler,
};

pub fn build_server(port: u16, catalog: Arc<Catalog>, queue: JobQueue) -> std::io::Result<Server> {
    let catalog = web::Data::from(catalog);
    let queue = web::Data::new(queue);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(catalog.clone())
            .app_data(queue.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::Logger::default())
            .service(post_run_handler)
            .service(get_result_handler)
            .service(cancel_job_handler)
            .service(health_handler)
    })
    .bind(("0.0.0.0", port))?
    .run();

    Ok(server)
}
