//! Coordinator fronting a split deployment, where the embeddings and the URL database live on different servers.

use privsearch_common::{
    error::PrivSearchError,
    hint::HintBundle,
    wire::{PreprocessingAnswer, PreprocessingRequest, Request, Response, Transport},
};
use tracing::{debug, info};

/// Exposes two single-database backends as one search server. Hint bundles are merged, offline-phase requests are
/// split between the backends, and answer requests are routed to the backend holding the database.
pub struct Coordinator<E: Transport, U: Transport> {
    embeddings: E,
    urls: U,
}

fn expect_hint(response: Response) -> Result<HintBundle, PrivSearchError> {
    match response {
        Response::Hint(bundle) => Ok(*bundle),
        Response::Failure(e) => Err(PrivSearchError::ServerFailure(e)),
        other => Err(PrivSearchError::UnexpectedResponse(other.kind())),
    }
}

fn expect_hint_answer(response: Response) -> Result<PreprocessingAnswer, PrivSearchError> {
    match response {
        Response::HintAnswer(answer) => Ok(answer),
        Response::Failure(e) => Err(PrivSearchError::ServerFailure(e)),
        other => Err(PrivSearchError::UnexpectedResponse(other.kind())),
    }
}

impl<E: Transport, U: Transport> Coordinator<E, U> {
    pub fn new(embeddings: E, urls: U) -> Coordinator<E, U> {
        Coordinator { embeddings, urls }
    }

    fn get_hint(&mut self) -> Result<HintBundle, PrivSearchError> {
        let emb = expect_hint(self.embeddings.round_trip(Request::GetHint)?)?;
        let urls = expect_hint(self.urls.round_trip(Request::GetHint)?)?;

        let bundle = emb.merge(urls)?;
        info!(num_docs = bundle.params.num_docs, "Merged backend hint bundles");
        Ok(bundle)
    }

    fn apply_hint(&mut self, request: PreprocessingRequest) -> Result<PreprocessingAnswer, PrivSearchError> {
        let mut answer = PreprocessingAnswer::default();

        if let Some(query) = request.embeddings {
            let part = PreprocessingRequest {
                embeddings: Some(query),
                urls: None,
            };
            answer.embeddings = expect_hint_answer(self.embeddings.round_trip(Request::ApplyHint(part))?)?.embeddings;
        }
        if let Some(query) = request.urls {
            let part = PreprocessingRequest {
                embeddings: None,
                urls: Some(query),
            };
            answer.urls = expect_hint_answer(self.urls.round_trip(Request::ApplyHint(part))?)?.urls;
        }

        Ok(answer)
    }

    fn dispatch(&mut self, request: Request) -> Result<Response, PrivSearchError> {
        debug!(kind = request.kind(), "Routing request");

        match request {
            Request::GetHint => Ok(Response::Hint(Box::new(self.get_hint()?))),
            Request::ApplyHint(req) => Ok(Response::HintAnswer(self.apply_hint(req)?)),
            req @ Request::EmbeddingsAnswer(_) => self.embeddings.round_trip(req),
            req @ Request::UrlsAnswer(_) => self.urls.round_trip(req),
        }
    }
}

impl<E: Transport, U: Transport> Transport for Coordinator<E, U> {
    /// Backend failures are forwarded as failure responses, transport errors are propagated.
    fn round_trip(&mut self, request: Request) -> Result<Response, PrivSearchError> {
        match self.dispatch(request) {
            Ok(response) => Ok(response),
            Err(PrivSearchError::ServerFailure(e)) => Ok(Response::Failure(e)),
            Err(e @ PrivSearchError::InvalidConfig(_)) => Ok(Response::Failure(e.to_string())),
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) {
        self.embeddings.close();
        self.urls.close();
    }
}
