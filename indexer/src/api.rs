use std::sync::Arc;

use ::metrics::{
    HealthChecker,
    prometheus::{self, Encoder, Registry, TextEncoder},
};
use actix_web::{
    App, HttpResponse, HttpServer, Responder, error::InternalError, get, http::StatusCode, web,
};
use services::HealthReporter;

use crate::{
    config::Config,
    errors::{Error, Result},
};

pub async fn launch_api_server(
    config: &Config,
    metrics_registry: Registry,
    l1_health_check: HealthChecker,
    l2_health_check: HealthChecker,
) -> Result<()> {
    let metrics_registry = Arc::new(metrics_registry);
    let health_reporter = Arc::new(HealthReporter::new(l1_health_check, l2_health_check));
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(Arc::clone(&metrics_registry)))
            .app_data(web::Data::new(Arc::clone(&health_reporter)))
            .service(metrics)
            .service(health)
    })
    .bind((config.app.host, config.app.port))
    .map_err(|e| Error::Other(e.to_string()))?
    .run()
    .await
    .map_err(|e| Error::Other(e.to_string()))
}

#[get("/health")]
async fn health(data: web::Data<Arc<HealthReporter>>) -> impl Responder {
    let report = data.generate_report();

    let mut response = if report.is_healthy() {
        HttpResponse::Ok()
    } else {
        HttpResponse::InternalServerError()
    };

    response.json(report)
}

#[get("/metrics")]
async fn metrics(registry: web::Data<Arc<Registry>>) -> impl Responder {
    let encoder = TextEncoder::new();
    let mut buf: Vec<u8> = vec![];
    let mut encode = |metrics: &_| {
        encoder
            .encode(metrics, &mut buf)
            .map_err(map_to_internal_err)
    };

    encode(&registry.gather())?;
    encode(&prometheus::gather())?;

    let text = String::from_utf8(buf).map_err(map_to_internal_err)?;

    std::result::Result::<_, InternalError<_>>::Ok(text)
}

fn map_to_internal_err(error: impl std::error::Error) -> InternalError<String> {
    InternalError::new(error.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use actix_web::{body::to_bytes, test};
    use ::metrics::HealthCheck;

    use super::*;

    struct Healthy(bool);

    impl HealthCheck for Healthy {
        fn healthy(&self) -> bool {
            self.0
        }
    }

    fn app_with(
        l1_healthy: bool,
        l2_healthy: bool,
    ) -> App<
        impl actix_web::dev::ServiceFactory<
            actix_web::dev::ServiceRequest,
            Config = (),
            Response = actix_web::dev::ServiceResponse,
            Error = actix_web::Error,
            InitError = (),
        >,
    > {
        let reporter =
            HealthReporter::new(Box::new(Healthy(l1_healthy)), Box::new(Healthy(l2_healthy)));
        App::new()
            .app_data(web::Data::new(Arc::new(reporter)))
            .app_data(web::Data::new(Arc::new(Registry::new())))
            .service(health)
            .service(metrics)
    }

    #[actix_web::test]
    async fn health_is_ok_when_both_connections_are() {
        let app = test::init_service(app_with(true, true)).await;

        let response =
            test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn health_fails_when_l2_is_down() {
        let app = test::init_service(app_with(true, false)).await;

        let response =
            test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body()).await.unwrap();
        let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["healthy"], false);
        assert_eq!(report["l1"]["healthy"], true);
        assert_eq!(report["l2"]["healthy"], false);
        assert_eq!(report["l2"]["consecutive_failures"], 0);
    }

    #[actix_web::test]
    async fn metrics_are_served_as_text() {
        let app = test::init_service(app_with(true, true)).await;

        let response =
            test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;

        assert_eq!(response.status(), StatusCode::OK);
    }
}
