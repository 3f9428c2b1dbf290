//! Static status code to message table.

use crate::protocol::status::HResult;

/// Text for well known provider status codes.
pub fn status_text(status: HResult) -> Option<&'static str> {
    let text = match status {
        HResult::E_FAIL => "Unspecified error.",
        HResult::E_NOTIMPL => "Not implemented.",
        HResult::E_NOINTERFACE => "No such interface supported.",
        HResult::E_UNEXPECTED => "Catastrophic failure.",
        HResult::E_OUTOFMEMORY => "Ran out of memory.",
        HResult::DB_E_BADACCESSORHANDLE => "Accessor is invalid.",
        HResult::DB_E_ROWLIMITEXCEEDED => "Row could not be inserted into the rowset without exceeding provider's maximum number of active rows.",
        HResult::DB_E_READONLYACCESSOR => "Accessor is read-only. Operation failed.",
        HResult::DB_E_SCHEMAVIOLATION => "Values violate the database schema.",
        HResult::DB_E_BADROWHANDLE => "Row handle is invalid.",
        HResult::DB_E_OBJECTOPEN => "Object was open.",
        HResult::DB_E_BADCHAPTER => "Chapter is invalid.",
        HResult::DB_E_CANTCONVERTVALUE => "Data or literal value could not be converted to the type of the column in the data source, and the provider was unable to determine which columns could not be converted.  Data overflow or sign mismatch was not the cause.",
        HResult::DB_E_BADBINDINFO => "Binding information is invalid.",
        HResult::DB_SEC_E_PERMISSIONDENIED => "Permission denied.",
        HResult::DB_E_NOTAREFERENCECOLUMN => "Column does not contain bookmarks or chapters.",
        HResult::DB_E_LIMITREJECTED => "Cost limits were rejected.",
        HResult::DB_E_NOCOMMAND => "Command text was not set for the command object.",
        HResult::DB_E_COSTLIMIT => "Query plan within the cost limit cannot be found.",
        HResult::DB_E_BADBOOKMARK => "Bookmark is invalid.",
        HResult::DB_E_BADLOCKMODE => "Lock mode is invalid.",
        HResult::DB_E_PARAMNOTOPTIONAL => "No value given for one or more required parameters.",
        HResult::DB_E_BADCOLUMNID => "Column ID is invalid.",
        HResult::DB_E_BADRATIO => "Numerator was greater than denominator. Values must express ratio between zero and 1.",
        HResult::DB_E_BADVALUES => "Value is invalid.",
        HResult::DB_E_ERRORSINCOMMAND => "One or more errors occurred during processing of command.",
        HResult::DB_E_CANTCANCEL => "Command cannot be canceled.",
        HResult::DB_E_DIALECTNOTSUPPORTED => "Command dialect is not supported by this provider.",
        HResult::DB_E_DUPLICATEDATASOURCE => "Data source object could not be created because the named data source already exists.",
        HResult::DB_E_CANNOTRESTART => "Rowset position cannot be restarted.",
        HResult::DB_E_NOTFOUND => "Object or data matching the name, range, or selection criteria was not found within the scope of this operation.",
        HResult::DB_E_CANNOTFREE => "Provider has ownership of this tree.",
        HResult::DB_E_NEWLYINSERTED => "Identity cannot be determined for newly inserted rows.",
        HResult::DB_E_GOALREJECTED => "Goal was rejected because no nonzero weights were specified for any goals supported. Current goal was not changed.",
        HResult::DB_E_UNSUPPORTEDCONVERSION => "Requested conversion is not supported.",
        HResult::DB_E_BADSTARTPOSITION => "No rows were returned because the offset value moves the position before the beginning or after the end of the rowset.",
        HResult::DB_E_NOQUERY => "Information was requested for a query and the query was not set.",
        HResult::DB_E_NOTREENTRANT => "Consumer's event handler called a non-reentrant method in the provider.",
        HResult::DB_E_ERRORSOCCURRED => "Multiple-step OLE DB operation generated errors. Check each OLE DB status value, if available. No work was done.",
        HResult::DB_E_NOAGGREGATION => "Non-NULL controlling IUnknown was specified, and either the requested interface was not IUnknown, or the provider does not support COM aggregation.",
        HResult::DB_E_DELETEDROW => "Row handle referred to a deleted row or a row marked for deletion.",
        HResult::DB_E_CANTFETCHBACKWARDS => "Rowset does not support fetching backward.",
        HResult::DB_E_ROWSNOTRELEASED => "Row handles must all be released before new ones can be obtained.",
        HResult::DB_E_BADSTORAGEFLAG => "One or more storage flags are not supported.",
        HResult::DB_E_BADCOMPAREOP => "Comparison operator is invalid.",
        HResult::DB_E_BADSTATUSVALUE => "Status flag was neither DBCOLUMNSTATUS_OK nor DBCOLUMNSTATUS_ISNULL.",
        HResult::DB_E_CANTSCROLLBACKWARDS => "Rowset does not support scrolling backward.",
        HResult::DB_E_NOTABLE => "Table does not exist.",
        HResult::DB_SEC_E_AUTH_FAILED => "Authentication failed.",
        HResult::DB_E_CANCELED => "Operation was canceled.",
        HResult::DB_E_NOTSUPPORTED => "Method is not supported by this provider.",
        _ => return None,
    };
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(status_text(HResult::DB_E_BADROWHANDLE), Some("Row handle is invalid."));
        assert_eq!(
            status_text(HResult::DB_E_CANTFETCHBACKWARDS),
            Some("Rowset does not support fetching backward.")
        );
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(status_text(HResult(0x1234)), None);
        assert_eq!(status_text(HResult::S_OK), None);
    }
}
