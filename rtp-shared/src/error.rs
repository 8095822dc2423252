use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    //RTP packet intake errors
    #[error("packet is shorter than its RTP header")]
    ErrPacketShorterThanHeader,
    #[error("rtx packet too short to carry the original sequence number")]
    ErrRtxPacketTooShort,
    #[error("packet dropped by SSRC filter")]
    ErrSsrcFiltered,
    #[error("unknown payload type {0}")]
    ErrUnknownPayloadType(u8),
    #[error("RED packet wraps another RED payload")]
    ErrRedInsideRed,

    //Payload registry errors
    #[error("payload name exceeds the maximum payload name size")]
    ErrPayloadNameTooLong,
    #[error("payload type {0} is not registered")]
    ErrPayloadTypeUnknown(u8),
    #[error("no payload registered matching the codec parameters")]
    ErrPayloadNameUnknown,
    #[error("comfort noise payload registered with unsupported frequency {0}")]
    ErrCnFrequencyUnsupported(u32),

    //Header extension map errors
    #[error("header extension id must be between 1 and 14")]
    ErrExtensionIdOutOfRange,
    #[error("header extension id already in use")]
    ErrExtensionIdInUse,
    #[error("header extension type already registered")]
    ErrExtensionAlreadyRegistered,
    #[error("header extension type is not registered")]
    ErrExtensionNotRegistered,

    //Decoder errors
    #[error("failed to initialize decoder for payload type {0}")]
    ErrDecoderInitFailed(u8),

    //Statistics errors
    #[error("no RTP packets have been received")]
    ErrNoDataReceived,
    #[error("no statistics report has been generated yet")]
    ErrNoReportAvailable,
    #[error("no in-order RTP packet has been received")]
    ErrEstimateUnavailable,

    #[error("{0}")]
    Other(String),
}
