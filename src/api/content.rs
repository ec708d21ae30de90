use crate::codec::Payload;
use crate::error::MarqueeError;
use crate::rest::Session;
use crate::rest::types::{
    ContentItem, DEFAULT_CONTENTS_LIMIT, GetContentsParams, GetContentsResponse,
};

#[derive(Debug, Clone)]
pub struct ContentApi {
    session: Session,
}

impl ContentApi {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn current() -> Result<Self, MarqueeError> {
        Session::current().map(Self::new)
    }

    /// GET /content
    ///
    /// Parameters are validated locally; nothing is sent when they are out of range. An
    /// unset `limit` is sent as [`DEFAULT_CONTENTS_LIMIT`].
    pub async fn get_contents(
        &self,
        params: &GetContentsParams,
    ) -> Result<Vec<ContentItem>, MarqueeError> {
        params.validate()?;
        let params = GetContentsParams {
            limit: Some(params.effective_limit()),
            ..params.clone()
        };
        let response: GetContentsResponse =
            self.session.get("/content", Payload::model(&params)?).await?;
        Ok(response.data)
    }
}
